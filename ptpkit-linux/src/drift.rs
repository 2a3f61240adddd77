//! Drift file persistence: a single signed ppb value, loaded at startup and
//! saved at shutdown or once the servo stabilizes.

use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

pub fn load(path: &Path) -> Option<f64> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!("could not read drift file {}: {error}", path.display());
            return None;
        }
    };

    match contents.trim().parse::<f64>() {
        Ok(drift) if drift.is_finite() => {
            info!("loaded drift {drift:.3} ppb from {}", path.display());
            Some(drift)
        }
        _ => {
            warn!("ignoring malformed drift file {}", path.display());
            None
        }
    }
}

pub fn save(path: &Path, drift_ppb: f64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{drift_ppb:.3}\n"))?;
    info!("saved drift {drift_ppb:.3} ppb to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift");

        assert_eq!(load(&path), None);

        save(&path, -1234.5).unwrap();
        assert_eq!(load(&path), Some(-1234.5));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift");
        fs::write(&path, "not a number\n").unwrap();
        assert_eq!(load(&path), None);
    }
}
