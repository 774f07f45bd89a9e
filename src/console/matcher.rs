//! Literal pattern matching against the console byte stream.
//!
//! Prompts are not guaranteed to end in a newline, so nothing here is
//! line-buffered: bytes are taken one at a time and the trailing
//! `len(target)` bytes are compared after each one. That detects the
//! target the moment its last byte arrives, anywhere in the stream,
//! including mid-line. No regex, no partial-match bookkeeping.

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use super::Console;
use crate::error::{ProvisionError, Result};

impl Console {
    /// Block until `target` appears contiguously in the console output.
    ///
    /// Succeeds at the earliest byte that completes an occurrence of
    /// `target`. The deadline bounds the wait for the *next* byte, not the
    /// whole call: a guest that keeps producing output never times out
    /// here, while a silent one fails after `timeout`.
    ///
    /// Fails with [`ProvisionError::Timeout`] on silence and
    /// [`ProvisionError::ConsoleClosed`] if the stream ends first.
    pub fn expect(&mut self, target: &str, timeout: Duration) -> Result<()> {
        assert!(!target.is_empty(), "expect target must be non-empty");
        let needle = target.as_bytes();
        let mut window: Vec<u8> = Vec::with_capacity(needle.len());

        loop {
            let byte = match self.rx.recv_timeout(timeout) {
                Ok(byte) => byte,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ProvisionError::Timeout {
                        pattern: target.to_string(),
                        seconds: timeout.as_secs(),
                        tail: self.tail(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ProvisionError::ConsoleClosed {
                        pattern: target.to_string(),
                        tail: self.tail(),
                    });
                }
            };
            self.push_tail(byte);

            if window.len() == needle.len() {
                window.remove(0);
            }
            window.push(byte);
            if window == needle {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::console::testing::wired;
    use crate::error::ProvisionError;
    use std::thread;
    use std::time::Duration;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn finds_target_mid_line() {
        let (mut console, guest_out, _to_guest, _sink) = wired();
        // No newline after the prompt - exactly the case line buffering loses.
        guest_out.send(b"installer login:".to_vec()).unwrap();

        console.expect("login:", T).unwrap();
    }

    #[test]
    fn finds_overlapping_occurrence() {
        // "aab" occurs in "aaab" only at offset 1; a prefix counter that
        // resets on mismatch would miss it.
        let (mut console, guest_out, _to_guest, _sink) = wired();
        guest_out.send(b"aaab".to_vec()).unwrap();

        console.expect("aab", T).unwrap();
    }

    #[test]
    fn false_start_does_not_poison_later_match() {
        // "abab" breaks at the third byte, then occurs for real later.
        let (mut console, guest_out, _to_guest, _sink) = wired();
        guest_out.send(b"abaabab".to_vec()).unwrap();

        console.expect("abab", T).unwrap();
    }

    #[test]
    fn absent_target_is_console_closed_at_eof() {
        let (mut console, guest_out, _to_guest, _sink) = wired();
        guest_out.send(b"abaXb".to_vec()).unwrap();
        drop(guest_out);

        let err = console.expect("abab", T).unwrap_err();
        assert!(matches!(err, ProvisionError::ConsoleClosed { .. }));
    }

    #[test]
    fn sequential_expects_consume_monotonically() {
        let (mut console, guest_out, _to_guest, _sink) = wired();
        guest_out.send(b"# first\n# second\n".to_vec()).unwrap();

        console.expect("# ", T).unwrap();
        console.expect("# ", T).unwrap();
        // Past both prompts now; only "second" remains ahead of the cursor.
        console.expect("second", T).unwrap();
    }

    #[test]
    fn silent_stream_times_out() {
        let (mut console, guest_out, _to_guest, _sink) = wired();

        let err = console
            .expect("login:", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
        // Keep the guest end alive so EOF never fires first.
        drop(guest_out);
    }

    #[test]
    fn stall_after_partial_match_times_out() {
        let (mut console, guest_out, _to_guest, _sink) = wired();
        guest_out.send(b"log".to_vec()).unwrap();

        let err = console
            .expect("login:", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
        drop(guest_out);
    }

    #[test]
    fn deadline_is_per_byte_not_per_call() {
        let (mut console, guest_out, _to_guest, _sink) = wired();
        // 20 bytes, 30ms apart: total well over the 150ms deadline, but
        // every inter-byte gap is under it.
        thread::spawn(move || {
            for byte in b"# PROVISION READY # " {
                if guest_out.send(vec![*byte]).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(30));
            }
        });

        console
            .expect("READY", Duration::from_millis(150))
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn empty_target_is_rejected() {
        let (mut console, _guest_out, _to_guest, _sink) = wired();
        let _ = console.expect("", T);
    }
}
