// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous things.

use std::{thread, time::Duration};

use console::Term;
use crossbeam_channel::{bounded, TryRecvError};
use is_terminal::IsTerminal;

fn is_a_tty() -> bool {
    std::io::stdout().is_terminal() || std::io::stderr().is_terminal()
}

/// Perform this expensive operation as a normal Rust function, but if it takes
/// more than a certain amount of time, display a message to the user that
/// you're still waiting for this operation to complete.
pub(crate) fn expensive_op<F, R>(func: F, wait_message: &str) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    const INITIAL_WAIT_TIME: Duration = Duration::from_secs(2);
    const INC_WAIT_TIME: Duration = Duration::from_millis(250);

    let (tx, rx) = bounded(1);

    thread::scope(|s| {
        // The channel only signals that the operation is over. If `func`
        // panics, `tx` is dropped while unwinding and the receiver sees a
        // disconnection.
        let handle = s.spawn(move || {
            let r = func();
            let _ = tx.send(());
            r
        });

        // Only print messages if we're in an interactive terminal.
        let term = is_a_tty().then(Term::stderr);

        let mut total_wait_time = Duration::from_secs(0);
        let mut printed_wait_line = false;
        while let Err(TryRecvError::Empty) = rx.try_recv() {
            thread::sleep(INC_WAIT_TIME);
            total_wait_time += INC_WAIT_TIME;
            if let Some(term) = term.as_ref() {
                if total_wait_time >= INITIAL_WAIT_TIME {
                    if printed_wait_line {
                        let _ = term.move_cursor_up(1);
                        let _ = term.clear_line();
                    }
                    let _ = term.write_line(&format!(
                        "{wait_message}: {:.2}s",
                        total_wait_time.as_secs_f64()
                    ));
                    printed_wait_line = true;
                }
            }
        }

        // Clear the waiting line.
        if let Some(term) = term.as_ref() {
            if printed_wait_line {
                let _ = term.move_cursor_up(1);
                let _ = term.clear_line();
            }
        }
        match handle.join() {
            Ok(r) => r,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}

/// A short human-readable duration for log messages, e.g. "1m 02.35s".
pub(crate) fn pretty_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        let mins = (secs / 60.0).floor();
        format!("{mins:.0}m {:05.2}s", secs - mins * 60.0)
    }
}
