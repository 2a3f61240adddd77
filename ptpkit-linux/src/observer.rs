//! The logging observability sink: state transitions and periodic
//! synchronization statistics, plus drift persistence on stability.

use std::path::PathBuf;

use log::{info, warn};

use ptpkit::{Observer, PortState, SlaveStatistics};

use crate::drift;

pub struct LogObserver {
    /// Where to persist the drift once the servo stabilizes (`drift-handling
    /// = "file"`); None disables persistence.
    drift_file: Option<PathBuf>,
    save_pending: bool,
}

impl LogObserver {
    pub fn new(drift_file: Option<PathBuf>) -> Self {
        Self {
            drift_file,
            save_pending: false,
        }
    }
}

impl Observer for LogObserver {
    fn state_change(&mut self, _from: PortState, to: PortState) {
        // The transition itself is logged by the port; here we only track
        // what matters for the sink.
        if to == PortState::Faulty {
            warn!("port entered FAULTY state, manual intervention may be required");
        }
    }

    fn statistics(&mut self, statistics: &SlaveStatistics) {
        let offset = statistics
            .offset_from_master
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".into());
        let delay = statistics
            .mean_path_delay
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        info!(
            "stats: ofm {offset} s, mpd {delay} s, adj {:.3} ppb, drift {:.3} ppb{}{}",
            statistics.frequency_adjustment_ppb,
            statistics.drift_ppb,
            if statistics.servo_stable { ", stable" } else { "" },
            if statistics.delay_misses > 0 {
                format!(", {} delay misses", statistics.delay_misses)
            } else {
                String::new()
            },
        );

        if self.save_pending {
            self.save_pending = false;
            if let Some(path) = &self.drift_file {
                if let Err(error) = drift::save(path, statistics.drift_ppb) {
                    warn!("could not save drift file: {error}");
                }
            }
        }
    }

    fn servo_stability(&mut self, stable: bool) {
        if stable {
            // Persist on the next statistics callback, which carries the
            // current drift value.
            self.save_pending = true;
        }
    }
}
