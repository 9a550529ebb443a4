//! Single-shot alarms owned by the control engine.
//!
//! Two alarms exist, addressed by name:
//!
//! - [`Alarm::Selection`]: the selector line has been high long enough.
//! - [`Alarm::WriteGap`]: the gap the emulator generates before transmitting is over.
//!
//! Arming an armed alarm replaces its deadline; cancelling an idle alarm does
//! nothing. Expiry is delivered as a control event through the
//! [`LineMonitor`], so an alarm that fires after being superseded reaches the
//! engine as a stale event and is ignored there.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::monitor::LineMonitor;

/// The engine's two named alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alarm {
    /// Selector line held high for the selection delay.
    Selection,
    /// Emulator-generated write gap elapsed.
    WriteGap,
}

impl Alarm {
    /// Both alarms.
    pub const ALL: [Alarm; 2] = [Alarm::Selection, Alarm::WriteGap];

    pub(crate) const fn index(self) -> usize {
        match self {
            Alarm::Selection => 0,
            Alarm::WriteGap => 1,
        }
    }
}

/// Cancel-and-rearm timer service used by the control engine.
pub trait Alarms {
    /// Fire `alarm` once after `delay`, replacing any pending deadline.
    ///
    /// Replacing a deadline does not recall an expiry that was already
    /// delivered. An event queued just before the re-arm still reaches the
    /// engine and can end a freshly armed write gap early; the engine only
    /// checks that the expiry matches the current phase.
    fn arm(&mut self, alarm: Alarm, delay: Duration);

    /// Forget any pending deadline for `alarm`.
    ///
    /// An expiry already delivered to the control queue stays there.
    fn cancel(&mut self, alarm: Alarm);
}

#[derive(Debug)]
enum AlarmCommand {
    Arm(Duration),
    Cancel,
    Shutdown,
}

#[derive(Debug)]
struct AlarmWorker {
    commands: Sender<AlarmCommand>,
    thread: Option<JoinHandle<()>>,
}

/// Host implementation of [`Alarms`] with one worker thread per alarm.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use microdrive::{event_channel, Alarm, Alarms, ControlEvent, LineMonitor, ThreadAlarms};
///
/// let (tx, rx) = event_channel(4);
/// let mut alarms = ThreadAlarms::new(LineMonitor::new(tx)).unwrap();
///
/// alarms.arm(Alarm::WriteGap, Duration::from_millis(1));
/// let event = rx.pop_timeout(Duration::from_secs(5)).unwrap();
/// assert_eq!(event, Some(ControlEvent::WriteGapTimerExpired));
/// ```
#[derive(Debug)]
pub struct ThreadAlarms {
    workers: Vec<AlarmWorker>,
}

impl ThreadAlarms {
    /// Spawn the alarm workers, delivering expiries through `monitor`.
    pub fn new(monitor: LineMonitor) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(Alarm::ALL.len());
        for alarm in Alarm::ALL {
            let (commands, rx) = crossbeam_channel::unbounded();
            let monitor = monitor.clone();
            let thread = thread::Builder::new()
                .name(format!("alarm-{alarm:?}").to_lowercase())
                .spawn(move || run_alarm(alarm, rx, monitor))?;
            workers.push(AlarmWorker {
                commands,
                thread: Some(thread),
            });
        }
        Ok(ThreadAlarms { workers })
    }

    fn send(&self, alarm: Alarm, command: AlarmCommand) {
        if self.workers[alarm.index()].commands.send(command).is_err() {
            tracing::error!(?alarm, "alarm worker has exited");
        }
    }
}

impl Alarms for ThreadAlarms {
    fn arm(&mut self, alarm: Alarm, delay: Duration) {
        self.send(alarm, AlarmCommand::Arm(delay));
    }

    fn cancel(&mut self, alarm: Alarm) {
        self.send(alarm, AlarmCommand::Cancel);
    }
}

impl Drop for ThreadAlarms {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            let _ = worker.commands.send(AlarmCommand::Shutdown);
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn run_alarm(alarm: Alarm, commands: Receiver<AlarmCommand>, monitor: LineMonitor) {
    let mut deadline: Option<Instant> = None;

    loop {
        let expiry = match deadline {
            Some(at) => crossbeam_channel::at(at),
            None => crossbeam_channel::never(),
        };

        crossbeam_channel::select! {
            recv(commands) -> command => match command {
                Ok(AlarmCommand::Arm(delay)) => deadline = Some(Instant::now() + delay),
                Ok(AlarmCommand::Cancel) => deadline = None,
                Ok(AlarmCommand::Shutdown) | Err(_) => break,
            },
            recv(expiry) -> _ => {
                deadline = None;
                tracing::trace!(?alarm, "alarm expired");
                // Overflow is already reported by the monitor.
                let _ = monitor.alarm_fired(alarm);
            },
        }
    }
}
