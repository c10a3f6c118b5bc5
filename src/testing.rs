//! Scripted in-process rcon server for socket-level tests.
//!
//! Behaves like the HumanitZ server: every reply carries `id = 0`, the
//! handshake answers with RESPONSE_VALUE before AUTH_RESPONSE, and commands
//! without a scripted reply get no answer at all.

use hzrcon_proto::{self as proto, client, server, AUTH_FAILED_ID};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum AuthReply {
    /// RESPONSE_VALUE("") then AUTH_RESPONSE(id 0)
    Standard,
    /// AUTH_RESPONSE(id 0) only
    Bare,
    /// AUTH_RESPONSE(id -1) only
    Reject,
    /// never answer
    Silent,
    /// explicit (id, type, body) packets
    Packets(Vec<(i32, i32, String)>),
}

#[derive(Clone)]
enum Reply {
    Bodies(Vec<String>),
    /// packets with a pause between each
    Paced(Vec<String>, Duration),
    Raw(Vec<u8>),
    /// raw bytes, one at a time
    Trickle(Vec<u8>, Duration),
    HangUp,
}

#[derive(Clone)]
pub struct Script {
    auth: AuthReply,
    password: Option<String>,
    replies: HashMap<String, Reply>,
    echo: bool,
    delay: Duration,
}

impl Script {
    pub fn new() -> Self {
        Self {
            auth: AuthReply::Standard,
            password: None,
            replies: HashMap::new(),
            echo: false,
            delay: Duration::ZERO,
        }
    }

    pub fn auth(mut self, auth: AuthReply) -> Self {
        self.auth = auth;
        self
    }

    /// Reject any other password.
    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn reply(mut self, command: &str, bodies: &[&str]) -> Self {
        let bodies = bodies.iter().map(|b| b.to_string()).collect();
        self.replies.insert(command.to_string(), Reply::Bodies(bodies));
        self
    }

    /// Send each body as its own packet, `gap` apart.
    pub fn paced_reply(mut self, command: &str, bodies: &[&str], gap: Duration) -> Self {
        let bodies = bodies.iter().map(|b| b.to_string()).collect();
        self.replies
            .insert(command.to_string(), Reply::Paced(bodies, gap));
        self
    }

    /// Write `bytes` one byte per `gap`.
    pub fn trickle(mut self, command: &str, bytes: Vec<u8>, gap: Duration) -> Self {
        self.replies
            .insert(command.to_string(), Reply::Trickle(bytes, gap));
        self
    }

    pub fn raw_reply(mut self, command: &str, bytes: Vec<u8>) -> Self {
        self.replies.insert(command.to_string(), Reply::Raw(bytes));
        self
    }

    pub fn hang_up_on(mut self, command: &str) -> Self {
        self.replies.insert(command.to_string(), Reply::HangUp);
        self
    }

    /// Answer unscripted commands with their own text.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Wait before answering each command.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub struct FakeServer {
    port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(script);

        let log = Arc::clone(&commands);
        let count = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                count.fetch_add(1, Ordering::SeqCst);
                let script = Arc::clone(&script);
                let log = Arc::clone(&log);
                thread::spawn(move || serve(stream, &script, &log));
            }
        });

        Self {
            port,
            commands,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn send(stream: &mut TcpStream, id: i32, packet_type: i32, body: &str) -> std::io::Result<()> {
    stream.write_all(&proto::encode(id, packet_type, body))
}

fn serve(mut stream: TcpStream, script: &Script, log: &Mutex<Vec<String>>) {
    loop {
        let mut prefix = [0u8; proto::SIZE_FIELD];
        if stream.read_exact(&mut prefix).is_err() {
            return;
        }
        let Ok(size) = proto::decode_size(&prefix) else {
            return;
        };
        let mut frame = vec![0u8; size];
        if stream.read_exact(&mut frame).is_err() {
            return;
        }
        let Ok(packet) = proto::decode(&frame) else {
            return;
        };

        let result = match packet.packet_type {
            client::AUTH => {
                let auth = match &script.password {
                    Some(expected) if *expected != packet.body => AuthReply::Reject,
                    _ => script.auth.clone(),
                };
                match auth {
                    AuthReply::Standard => send(&mut stream, 0, server::RESPONSE_VALUE, "")
                        .and_then(|()| send(&mut stream, 0, server::AUTH_RESPONSE, "")),
                    AuthReply::Bare => send(&mut stream, 0, server::AUTH_RESPONSE, ""),
                    AuthReply::Reject => {
                        send(&mut stream, AUTH_FAILED_ID, server::AUTH_RESPONSE, "")
                    }
                    AuthReply::Silent => Ok(()),
                    AuthReply::Packets(packets) => packets
                        .iter()
                        .try_for_each(|(id, ty, body)| send(&mut stream, *id, *ty, body)),
                }
            }
            client::EXECCOMMAND => {
                log.lock().unwrap().push(packet.body.clone());
                thread::sleep(script.delay);
                match script.replies.get(&packet.body) {
                    Some(Reply::Bodies(bodies)) => bodies
                        .iter()
                        .try_for_each(|b| send(&mut stream, 0, server::RESPONSE_VALUE, b)),
                    Some(Reply::Paced(bodies, gap)) => {
                        bodies.iter().enumerate().try_for_each(|(i, b)| {
                            if i > 0 {
                                thread::sleep(*gap);
                            }
                            send(&mut stream, 0, server::RESPONSE_VALUE, b)
                        })
                    }
                    Some(Reply::Raw(bytes)) => stream.write_all(bytes),
                    Some(Reply::Trickle(bytes, gap)) => bytes.iter().try_for_each(|byte| {
                        thread::sleep(*gap);
                        stream.write_all(std::slice::from_ref(byte))
                    }),
                    Some(Reply::HangUp) => {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                    None if script.echo => {
                        send(&mut stream, 0, server::RESPONSE_VALUE, &packet.body)
                    }
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        };

        if result.is_err() {
            return;
        }
    }
}
