//! End-to-end remote-debug protocol tests against a real `TcpStream`.
//!
//! These don't fit naturally as `#[cfg(test)]` unit tests since they need
//! an actual socket pair, following the split `examples/kaplanz-rugby`
//! uses between in-module unit tests and crate-level `tests/` suites.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use msp430_arch::Shared;
use msp430_core::Core;
use msp430_gdb::DebugServer;

fn start_server() -> (u16, Shared<Core>) {
    let server = DebugServer::bind("127.0.0.1:0").expect("bind failed");
    let port = server.local_port().expect("local_port failed");
    let mut core = Core::new();
    core.bus.attach_default_ram();
    let core = Shared::new(core);
    let served = Shared::clone(&core);
    thread::spawn(move || server.serve(served));
    // Give the acceptor thread a moment to start listening.
    thread::sleep(Duration::from_millis(50));
    (port, core)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn send_packet(stream: &mut TcpStream, payload: &str) {
    let csum = msp430_gdb::proto::checksum(payload.as_bytes());
    write!(stream, "${payload}#{csum:02x}").unwrap();
    stream.flush().unwrap();
}

/// Reads one ack byte (`+` or `-`) followed by one full `$...#cc` packet,
/// returning (ack, payload).
fn read_ack_and_packet(stream: &mut TcpStream) -> (u8, String) {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).unwrap();
    let ack = byte[0];

    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'$' {
            break;
        }
    }
    let mut payload = Vec::new();
    loop {
        stream.read_exact(&mut byte).unwrap();
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }
    let mut csum = [0u8; 2];
    stream.read_exact(&mut csum).unwrap();
    (ack, String::from_utf8(payload).unwrap())
}

#[test]
fn query_halt_reason_returns_s00() {
    let (port, _core) = start_server();
    let mut stream = connect(port);
    send_packet(&mut stream, "?");
    let (ack, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(ack, b'+');
    assert_eq!(payload, "S00");
}

#[test]
fn write_then_read_all_registers() {
    let (port, _core) = start_server();
    let mut stream = connect(port);

    let mut image = String::new();
    for reg in 0u16..16 {
        image.push_str(&format!("{:02x}{:02x}", reg as u8, 0));
    }
    send_packet(&mut stream, &format!("G{image}"));
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "OK");

    send_packet(&mut stream, "g");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, image);
}

#[test]
fn read_one_register() {
    let (port, core) = start_server();
    core.lock().unwrap().regs.set(7, 0xBEEF);
    let mut stream = connect(port);
    send_packet(&mut stream, "p7");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "efbe");
}

#[test]
fn memory_write_then_read_round_trips() {
    let (port, _core) = start_server();
    let mut stream = connect(port);
    send_packet(&mut stream, "M0200,2:aabb");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "OK");

    send_packet(&mut stream, "m0200,2");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "aabb");
}

#[test]
fn breakpoint_run_and_stop_reply() {
    let (port, core) = start_server();
    {
        let mut core = core.lock().unwrap();
        // MOV #0x1234, R5; JMP $-2 (spin), breakpoint right after MOV.
        core.bus.write_word_quiet(0xF000, 0x4035);
        core.bus.write_word_quiet(0xF002, 0x1234);
        core.bus.write_word_quiet(0xF004, 0x3FFF);
        core.regs.set_pc(0xF000);
    }
    let mut stream = connect(port);

    send_packet(&mut stream, "Z0,F004,2");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "OK");

    send_packet(&mut stream, "c");
    // The server acks "c" immediately, then the runner thread writes the
    // stop-reply asynchronously once the breakpoint is hit; both arrive
    // on this same stream as one ack byte followed by one packet.
    let (ack, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(ack, b'+');
    assert_eq!(payload, "S05");
}

#[test]
fn monitor_reset_clears_registers() {
    let (port, core) = start_server();
    core.lock().unwrap().regs.set(3, 0x4242);
    let mut stream = connect(port);
    // "reset" hex-encoded.
    send_packet(&mut stream, "qRcmd,7265736574");
    let (_, payload) = read_ack_and_packet(&mut stream);
    assert_eq!(payload, "OK");
    assert_eq!(core.lock().unwrap().regs.get(3), 0);
}
