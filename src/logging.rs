/*
 *  logging.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per-component logger handed to each part of the host at construction
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

use std::fmt::Arguments;
use std::sync::Arc;

use log::Level;

/// Logger scoped to one component, e.g. `DrawingState/<surface id>`.
///
/// Every record goes through the `log` facade with the component name as
/// its target, so `RUST_LOG=DrawingState=debug` style filters work and the
/// logger stays silent when no backend has been installed (unit tests).
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    target: Arc<str>,
}

impl ModuleLogger {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Arc::from(target.into()),
        }
    }

    /// Derive a logger for a sub-component, `parent/child`.
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}/{}", self.target, name))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn log(&self, level: Level, args: Arguments<'_>) {
        log::log!(target: &*self.target, level, "{}", args);
    }

    pub fn debug(&self, args: Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn error(&self, args: Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_target() {
        let logger = ModuleLogger::new("PluginHost");
        let child = logger.child("virtual-1");
        assert_eq!(child.target(), "PluginHost/virtual-1");
        // no backend installed, must not panic
        child.info(format_args!("opened {}", 1));
    }
}
