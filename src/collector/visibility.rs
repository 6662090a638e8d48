//! Visibility, focus and fullscreen collector.
//!
//! Purely event-driven and edge-triggered: one detection per transition into
//! the bad state, never one per tick while the state persists.

use crate::collector::types::{Detection, HostSignal, ViolationType};
use crate::collector::{Collector, Emit};
use crate::error::{CollectorError, SensorKind};
use crate::scheduler::Cadence;
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub struct VisibilityCollector {
    running: bool,
    hidden: bool,
    focused: bool,
    fullscreen: bool,
}

impl VisibilityCollector {
    pub fn new() -> Self {
        Self {
            running: false,
            hidden: false,
            focused: true,
            fullscreen: true,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn is_tab_active(&self) -> bool {
        !self.hidden && self.focused
    }
}

impl Default for VisibilityCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for VisibilityCollector {
    fn name(&self) -> &'static str {
        "visibility"
    }

    fn sensor(&self) -> SensorKind {
        SensorKind::Page
    }

    fn cadence(&self) -> Cadence {
        Cadence::EventDriven
    }

    fn start(&mut self, _now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.running {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running = true;
        self.hidden = false;
        self.focused = true;
        self.fullscreen = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn on_signal(&mut self, signal: HostSignal, now: DateTime<Utc>, emit: Emit<'_>) {
        if !self.running {
            return;
        }

        match signal {
            HostSignal::VisibilityChanged { hidden } => {
                if hidden && !self.hidden {
                    emit(Detection::new(ViolationType::TabSwitch, now));
                }
                self.hidden = hidden;
            }
            HostSignal::WindowBlurred => {
                if self.focused {
                    emit(Detection::new(ViolationType::FocusLost, now));
                }
                self.focused = false;
            }
            HostSignal::WindowFocused => {
                self.focused = true;
            }
            HostSignal::FullscreenChanged { active } => {
                if !active && self.fullscreen {
                    emit(Detection::new(ViolationType::FullscreenExit, now));
                }
                self.fullscreen = active;
            }
            HostSignal::ScreenShareEnded => {}
        }
    }

    fn warning(&self) -> Option<String> {
        if self.running && !self.fullscreen {
            Some("Full-screen required: exiting full-screen is recorded as a violation.".into())
        } else {
            None
        }
    }
}
