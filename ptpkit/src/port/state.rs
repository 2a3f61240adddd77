/// The protocol state of a PTP port, section 9.2.5.
///
/// The port state machine in [`super::Port`] is the only place that changes
/// the active value, and only along the transitions that
/// [`PortState::valid_transition`] admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave,
}

impl PortState {
    /// Whether the port is tracking (or acquiring) a master.
    pub fn is_slave_like(&self) -> bool {
        matches!(self, PortState::Uncalibrated | PortState::Slave)
    }

    /// The defined transition table. Self-transitions (timer re-arms) are
    /// not state changes and are deliberately absent.
    pub fn valid_transition(from: PortState, to: PortState) -> bool {
        use PortState::*;

        if from == to {
            return false;
        }

        match (from, to) {
            // Fault and administrative disable are reachable from anywhere.
            (_, Faulty) => true,
            (_, Disabled) => true,
            (Faulty, Initializing) => true,
            (Disabled, Listening) => true,

            (Initializing, Listening) => true,

            // A master-capable clock qualifies through PRE_MASTER before it
            // takes over; a listening port may also take over directly when
            // nobody announces.
            (Listening | Uncalibrated | Slave | Passive, PreMaster) => true,
            (PreMaster, Master) => true,
            (Listening, Master) => true,

            // A better foreign master appeared.
            (Listening | Master | Passive | Slave | PreMaster, Uncalibrated) => true,
            (Uncalibrated, Slave) => true,

            // Announce receipt timeout / master loss.
            (Slave | Uncalibrated | Passive, Listening) => true,

            // The local clock is no longer best but cannot be a slave.
            (Master, Passive) => true,

            _ => false,
        }
    }
}

impl core::fmt::Display for PortState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            PortState::Initializing => "INITIALIZING",
            PortState::Faulty => "FAULTY",
            PortState::Disabled => "DISABLED",
            PortState::Listening => "LISTENING",
            PortState::PreMaster => "PRE_MASTER",
            PortState::Master => "MASTER",
            PortState::Passive => "PASSIVE",
            PortState::Uncalibrated => "UNCALIBRATED",
            PortState::Slave => "SLAVE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::PortState;
    use super::PortState::*;

    const ALL: [PortState; 9] = [
        Initializing,
        Faulty,
        Disabled,
        Listening,
        PreMaster,
        Master,
        Passive,
        Uncalibrated,
        Slave,
    ];

    #[test]
    fn faulty_and_disabled_are_reachable_from_everywhere() {
        for from in ALL {
            if from != Faulty {
                assert!(PortState::valid_transition(from, Faulty), "{from} -> FAULTY");
            }
            if from != Disabled {
                assert!(
                    PortState::valid_transition(from, Disabled),
                    "{from} -> DISABLED"
                );
            }
        }
    }

    #[test]
    fn exhaustive_transition_table() {
        // Everything allowed, as (from, to) pairs; any pair not listed here
        // (and not covered by the fault/disable rules) must be rejected.
        let allowed = [
            (Faulty, Initializing),
            (Disabled, Listening),
            (Initializing, Listening),
            (Listening, PreMaster),
            (Uncalibrated, PreMaster),
            (Slave, PreMaster),
            (Passive, PreMaster),
            (PreMaster, Master),
            (Listening, Master),
            (Listening, Uncalibrated),
            (Master, Uncalibrated),
            (Passive, Uncalibrated),
            (Slave, Uncalibrated),
            (PreMaster, Uncalibrated),
            (Uncalibrated, Slave),
            (Slave, Listening),
            (Uncalibrated, Listening),
            (Passive, Listening),
            (Master, Passive),
        ];

        for from in ALL {
            for to in ALL {
                let expected = to == Faulty && from != Faulty
                    || to == Disabled && from != Disabled
                    || allowed.contains(&(from, to));
                assert_eq!(
                    PortState::valid_transition(from, to),
                    expected,
                    "transition {from} -> {to}"
                );
            }
        }
    }
}
