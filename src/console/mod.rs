//! Serial console transport for the VM.
//!
//! The VM's serial console is wired to its stdio at spawn time, so both
//! pipes exist before the first boot byte and nothing is lost. A reader
//! thread pulls raw bytes off the read side, mirrors every byte in order
//! to a host-visible sink (stdout by default) so an operator can watch the
//! run live, and forwards every byte to the pattern matcher's channel.
//! The mirror is the only audit trail when a run fails.

mod matcher;

use std::io::{Read, Write};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::error::{ProvisionError, Result};

/// How much trailing console output to keep for error messages.
const TAIL_BYTES: usize = 1024;

/// Byte-level console controller for the VM's serial I/O.
pub struct Console {
    input: Box<dyn Write + Send>,
    pub(crate) rx: Receiver<u8>,
    /// Rolling tail of received bytes, kept for error diagnostics.
    tail: Vec<u8>,
}

impl Console {
    /// Wire a console to a spawned VM process.
    pub fn new(child: &mut Child) -> Result<Self> {
        let stdin = child.stdin.take().ok_or_else(|| ProvisionError::Launch {
            reason: "VM process has no stdin pipe".to_string(),
            source: None,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProvisionError::Launch {
            reason: "VM process has no stdout pipe".to_string(),
            source: None,
        })?;
        Ok(Self::from_io(stdout, stdin, Box::new(std::io::stdout())))
    }

    /// Build a console from arbitrary endpoints.
    ///
    /// Production wires the VM's pipes; tests wire in-memory streams.
    pub fn from_io<R, W>(reader: R, writer: W, sink: Box<dyn Write + Send>) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || Self::reader_thread(reader, sink, tx));
        Self {
            input: Box::new(writer),
            rx,
            tail: Vec::new(),
        }
    }

    /// Pump bytes from the VM to the sink and the matcher channel.
    ///
    /// Single producer for both consumers, so both see every byte in the
    /// order the VM emitted it. Ends when the VM closes its side.
    fn reader_thread<R: Read>(mut reader: R, mut sink: Box<dyn Write + Send>, tx: Sender<u8>) {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = sink.write_all(&buf[..n]);
                    let _ = sink.flush();
                    for &byte in &buf[..n] {
                        if tx.send(byte).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Send raw bytes to the VM's console input, unbuffered.
    pub fn send(&mut self, data: &str) -> Result<()> {
        self.input.write_all(data.as_bytes())?;
        self.input.flush()?;
        Ok(())
    }

    pub(crate) fn push_tail(&mut self, byte: u8) {
        self.tail.push(byte);
        if self.tail.len() > 2 * TAIL_BYTES {
            self.tail.drain(..TAIL_BYTES);
        }
    }

    /// Recent console output, lossily decoded, for error reports.
    pub fn tail(&self) -> String {
        let start = self.tail.len().saturating_sub(TAIL_BYTES);
        String::from_utf8_lossy(&self.tail[start..]).into_owned()
    }
}
