//! The remote-debug TCP server.
//!
//! One acceptor thread owns the listening socket; each accepted
//! connection gets a protocol thread (reads packets, answers synchronous
//! queries) and a runner thread (executes `run`/`step` against the
//! simulator core). The two communicate over a depth-1 `run`/`step`
//! command queue and a shared, mutex-guarded [`RunLoop`] for breakpoint
//! bookkeeping; the interrupt flag is a lock-free atomic so a `0x03` byte
//! can stop a `run` without waiting on anything the runner holds.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;

use log::{debug, info, warn};
use msp430_arch::Shared;
use msp430_core::runloop::{RunLoop, StopReason};
use msp430_core::Core;

use crate::{monitor, proto};

/// Work handed from the protocol thread to the runner thread.
enum Command {
    Run,
    Step,
}

/// Listens for remote-debug connections and spawns one handler per client.
pub struct DebugServer {
    listener: TcpListener,
}

impl DebugServer {
    /// Binds the listening socket. Does not yet accept connections.
    ///
    /// # Errors
    ///
    /// Returns any [`std::io::Error`] `TcpListener::bind` raises.
    pub fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener })
    }

    /// The default port this protocol listens on.
    pub const DEFAULT_PORT: u16 = 3333;

    /// The bound local address's port, useful when binding to port 0 in
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns any [`std::io::Error`] querying the socket raises.
    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts connections forever, each against the same shared core.
    ///
    /// All clients observe and mutate the same simulator instance; exclusive
    /// access across client threads is enforced with a mutex (`Shared`)
    /// rather than left to an unenforced calling convention.
    pub fn serve(self, core: Shared<Core>) {
        info!("listening on {:?}", self.listener.local_addr());
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let core = Shared::clone(&core);
                    thread::spawn(move || {
                        if let Err(err) = handle_client(stream, core) {
                            warn!("client handler exited: {err}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
    }
}

fn handle_client(stream: TcpStream, core: Shared<Core>) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    info!("connected by {:?}", stream.peer_addr());

    let reader_stream = stream.try_clone()?;
    let writer = Shared::new(stream);
    let mut reader = BufReader::new(reader_stream);

    let mut runloop = RunLoop::new();
    let interrupt = runloop.interrupt_handle();
    runloop.set_observer(|event: &msp430_core::event::Event| debug!("core event: {event:?}"));
    let runloop = Shared::new(runloop);

    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<Command>(0);

    let runner = {
        let core = Shared::clone(&core);
        let runloop = Shared::clone(&runloop);
        let writer = Shared::clone(&writer);
        thread::spawn(move || run_runner(&cmd_rx, &core, &runloop, &writer))
    };

    let result = protocol_loop(&mut reader, &writer, &core, &runloop, &cmd_tx, &interrupt);
    drop(cmd_tx);
    let _ = runner.join();
    result
}

fn run_runner(
    cmd_rx: &mpsc::Receiver<Command>,
    core: &Shared<Core>,
    runloop: &Shared<RunLoop>,
    writer: &Shared<TcpStream>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        let reason = {
            let mut core = core.lock().expect("lock poisoned");
            let mut runloop = runloop.lock().expect("lock poisoned");
            match cmd {
                Command::Run => runloop.run(&mut core),
                Command::Step => runloop.step(&mut core),
            }
        };
        let signal = match reason {
            StopReason::Trap => "S05",
            StopReason::Interrupt => "S02",
            StopReason::Fault(ref err) => {
                warn!("core fault: {err}");
                "S0B"
            }
        };
        let mut w = writer.lock().expect("lock poisoned");
        if let Err(err) = proto::write_packet(&mut *w, signal) {
            warn!("failed to write stop-reply: {err}");
        }
    }
}

#[allow(clippy::too_many_lines)]
fn protocol_loop(
    reader: &mut BufReader<TcpStream>,
    writer: &Shared<TcpStream>,
    core: &Shared<Core>,
    runloop: &Shared<RunLoop>,
    cmd_tx: &mpsc::SyncSender<Command>,
    interrupt: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> std::io::Result<()> {
    loop {
        let packet = {
            let interrupt = std::sync::Arc::clone(interrupt);
            proto::read_packet(reader, move || interrupt.store(true, Ordering::SeqCst))
        };
        let payload = match packet {
            Ok(payload) => payload,
            Err(proto::Error::Eof) => {
                info!("client disconnected");
                return Ok(());
            }
            Err(err) => {
                warn!("packet error: {err}");
                let mut w = writer.lock().expect("lock poisoned");
                proto::write_nack(&mut *w)?;
                continue;
            }
        };
        {
            let mut w = writer.lock().expect("lock poisoned");
            proto::write_ack(&mut *w)?;
        }

        let mut bytes = payload.bytes();
        let Some(op) = bytes.next() else {
            let mut w = writer.lock().expect("lock poisoned");
            proto::write_packet(&mut *w, "")?;
            continue;
        };
        let rest = &payload[1..];

        match op {
            b'?' => reply(writer, "S00")?,
            b'c' => {
                if !rest.is_empty() {
                    if let Ok(addr) = u16::from_str_radix(rest, 16) {
                        core.lock().expect("lock poisoned").regs.set_pc(addr);
                    }
                }
                let _ = cmd_tx.send(Command::Run);
            }
            b's' => {
                if !rest.is_empty() {
                    if let Ok(addr) = u16::from_str_radix(rest, 16) {
                        core.lock().expect("lock poisoned").regs.set_pc(addr);
                    }
                }
                let _ = cmd_tx.send(Command::Step);
            }
            b'g' => {
                let core = core.lock().expect("lock poisoned");
                let mut text = String::with_capacity(64);
                for idx in 0..16 {
                    let value = core.regs.get(idx);
                    text.push_str(&format!("{:02x}{:02x}", value & 0xFF, value >> 8));
                }
                drop(core);
                reply(writer, &text)?;
            }
            b'G' => {
                if rest.len() == 64 && rest.bytes().all(|b| b.is_ascii_hexdigit()) {
                    let mut core = core.lock().expect("lock poisoned");
                    for idx in 0..16 {
                        let chunk = &rest[idx * 4..idx * 4 + 4];
                        let lo = u16::from_str_radix(&chunk[0..2], 16).unwrap_or(0);
                        let hi = u16::from_str_radix(&chunk[2..4], 16).unwrap_or(0);
                        core.regs.set(idx, lo | (hi << 8));
                    }
                    drop(core);
                    reply(writer, "OK")?;
                } else {
                    reply(writer, "E01")?;
                }
            }
            b'p' => match usize::from_str_radix(rest, 16) {
                Ok(idx) if idx < 16 => {
                    let value = core.lock().expect("lock poisoned").regs.get(idx);
                    reply(writer, &format!("{:02x}{:02x}", value & 0xFF, value >> 8))?;
                }
                _ => reply(writer, "E01")?,
            },
            b'P' => {
                if let Some((reg, data)) = rest.split_once('=') {
                    let idx = usize::from_str_radix(reg, 16);
                    let bytes = decode_hex(data);
                    match (idx, bytes) {
                        (Ok(idx), Some(bytes)) if idx < 16 && bytes.len() == 2 => {
                            let value = u16::from(bytes[0]) | (u16::from(bytes[1]) << 8);
                            core.lock().expect("lock poisoned").regs.set(idx, value);
                            reply(writer, "OK")?;
                        }
                        _ => reply(writer, "E01")?,
                    }
                } else {
                    reply(writer, "E01")?;
                }
            }
            b'm' => {
                if let Some((addr, len)) = rest.split_once(',') {
                    let addr = u16::from_str_radix(addr, 16);
                    let len = usize::from_str_radix(len, 16);
                    match (addr, len) {
                        (Ok(addr), Ok(len)) => {
                            let mut core = core.lock().expect("lock poisoned");
                            let mut text = String::with_capacity(len * 2);
                            for offset in 0..len {
                                let byte = core.bus.read_byte(addr.wrapping_add(offset as u16))
                                    .unwrap_or(0);
                                text.push_str(&format!("{byte:02x}"));
                            }
                            drop(core);
                            reply(writer, &text)?;
                        }
                        _ => reply(writer, "E01")?,
                    }
                } else {
                    reply(writer, "E01")?;
                }
            }
            b'M' => {
                if let Some((meta, data)) = rest.split_once(':') {
                    if let Some((addr, len)) = meta.split_once(',') {
                        let addr = u16::from_str_radix(addr, 16);
                        let len = usize::from_str_radix(len, 16);
                        let bytes = decode_hex(data);
                        match (addr, len, bytes) {
                            (Ok(addr), Ok(len), Some(bytes)) if bytes.len() == len => {
                                let mut core = core.lock().expect("lock poisoned");
                                for (offset, byte) in bytes.iter().enumerate() {
                                    let _ = core
                                        .bus
                                        .write_byte(addr.wrapping_add(offset as u16), *byte);
                                }
                                drop(core);
                                reply(writer, "OK")?;
                            }
                            _ => reply(writer, "E01")?,
                        }
                    } else {
                        reply(writer, "E01")?;
                    }
                } else {
                    reply(writer, "E01")?;
                }
            }
            b'Z' | b'z' => {
                let mut fields = rest.split(',');
                let ty = fields.next();
                let addr = fields.next().and_then(|a| u16::from_str_radix(a, 16).ok());
                match (ty, addr) {
                    (Some("0"), Some(addr)) => {
                        let mut rl = runloop.lock().expect("lock poisoned");
                        if op == b'Z' {
                            rl.set_breakpoint(addr);
                            drop(rl);
                            reply(writer, "OK")?;
                        } else if rl.clear_breakpoint(addr) {
                            drop(rl);
                            reply(writer, "OK")?;
                        } else {
                            drop(rl);
                            reply(writer, "E02")?;
                        }
                    }
                    _ => reply(writer, "E01")?,
                }
            }
            b'H' => reply(writer, "OK")?,
            b'k' | b'D' => {
                core.lock().expect("lock poisoned").reset();
                reply(writer, "OK")?;
            }
            b'q' if rest.starts_with("Rcmd,") => {
                let hex = &rest["Rcmd,".len()..];
                let Some(decoded) = decode_hex(hex).and_then(|b| String::from_utf8(b).ok()) else {
                    reply(writer, "E01")?;
                    continue;
                };
                let trimmed = decoded.trim();
                let (command, _args) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
                match monitor::dispatch(command, core, |line| {
                    let _ = reply(writer, &format!("O{}", hex_encode(line.as_bytes())));
                }) {
                    monitor::Outcome::Ok => reply(writer, "OK")?,
                    monitor::Outcome::Unknown => reply(writer, "E02")?,
                }
            }
            _ => reply(writer, "")?,
        }
    }
}

fn reply(writer: &Shared<TcpStream>, payload: &str) -> std::io::Result<()> {
    let mut w = writer.lock().expect("lock poisoned");
    proto::write_packet(&mut *w, payload)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
