use crate::time::TimeInternal;

/// The CurrentDS, describing the synchronization state towards the current
/// master, section 8.2.2.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CurrentDS {
    pub steps_removed: u16,
    pub offset_from_master: TimeInternal,
    pub mean_path_delay: TimeInternal,
}
