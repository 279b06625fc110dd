/*
 *  surface/error.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error type for the surface host
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use thiserror::Error;

/// Unified error type for all surface operations
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Draw or input addressed a control the layout doesn't declare
    #[error("Unknown control \"{control_id}\" on surface {surface_id}")]
    UnknownControl {
        surface_id: String,
        control_id: String,
    },

    /// Surface is not in the registry, or its open is still in flight
    #[error("Surface with id {0} is not opened")]
    SurfaceNotOpen(String),

    /// Surface is already open, or an open for it is in progress
    #[error("Surface with id {0} is already opened")]
    SurfaceAlreadyOpen(String),

    /// Device id is not part of the latest scan
    #[error("Surface {0} was not found in the latest scan")]
    UnknownScannedDevice(String),

    /// The surface back-reference of a context was registered twice
    #[error("Surface {0} is already attached to its context")]
    AlreadyAttached(String),

    /// Work was offered to a queue which has already been drained
    #[error("Job queue has been drained and no longer accepts work")]
    QueueSpent,

    /// Optional driver hook not implemented
    #[error("Operation not supported by this surface")]
    UnsupportedOperation,

    /// Device I/O failure
    #[error("Surface driver error: {0}")]
    Driver(String),

    /// Metadata fetch failure
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Pincode map breaks the digit or uniqueness rules
    #[error("Invalid pincode map: {0}")]
    InvalidPincodeMap(String),

    /// Card or glyph generation failure
    #[error("Graphics error: {0}")]
    Graphics(String),

    /// Surface wrapped outside a tokio runtime
    #[error("No tokio runtime to run surface jobs on")]
    NoRuntime,

    /// The job observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Open or init of a surface failed
    #[error("Failed to open surface {surface_id}: {source}")]
    Lifecycle {
        surface_id: String,
        #[source]
        source: Box<SurfaceError>,
    },
}

impl SurfaceError {
    /// Wrap an open/init failure with the surface it belongs to
    pub fn lifecycle(surface_id: &str, source: SurfaceError) -> Self {
        SurfaceError::Lifecycle {
            surface_id: surface_id.to_string(),
            source: Box::new(source),
        }
    }

    /// True for the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SurfaceError::UnknownControl { .. }
                | SurfaceError::SurfaceNotOpen(_)
                | SurfaceError::UnknownScannedDevice(_)
        )
    }
}

impl From<reqwest::Error> for SurfaceError {
    fn from(err: reqwest::Error) -> Self {
        SurfaceError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for SurfaceError {
    fn from(err: serde_json::Error) -> Self {
        SurfaceError::Fetch(format!("invalid JSON payload: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_lifecycle_source_chain() {
        let err = SurfaceError::lifecycle("sd-1", SurfaceError::Driver("usb stall".into()));
        assert!(err.to_string().contains("sd-1"));
        let source = err.source().expect("lifecycle errors carry a source");
        assert_eq!(source.to_string(), "Surface driver error: usb stall");
    }

    #[test]
    fn test_not_found_family() {
        assert!(SurfaceError::SurfaceNotOpen("a".into()).is_not_found());
        assert!(SurfaceError::UnknownScannedDevice("a".into()).is_not_found());
        assert!(!SurfaceError::QueueSpent.is_not_found());
    }
}
