/*
 *  surface/types.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Surface layout, draw payloads and registration properties
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

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::pincode::PincodeMap;

/// Stable surface identity, typically the device serial number
pub type SurfaceId = String;

/// Id of one addressable control within a surface layout
pub type ControlId = String;

/// Name of the style preset every layout must carry
pub const DEFAULT_STYLE_PRESET: &str = "default";

/// Pixel layout of bitmaps sent to a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb,
    Rgba,
    Bgr,
    Bgra,
}

impl PixelFormat {
    /// Bytes used by one pixel in this format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }
}

/// Bitmap dimensions requested by a style preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapConfig {
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PixelFormat>,
}

impl BitmapConfig {
    pub fn new(w: u32, h: u32, format: PixelFormat) -> Self {
        Self {
            w,
            h,
            format: Some(format),
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.unwrap_or_default()
    }

    /// Size in bytes of a full bitmap for this config
    pub fn byte_len(&self) -> usize {
        self.w as usize * self.h as usize * self.pixel_format().bytes_per_pixel()
    }

    /// An all-zero bitmap, used to clear a control
    pub fn blank_bitmap(&self) -> Vec<u8> {
        vec![0; self.byte_len()]
    }
}

/// How a control wants to be drawn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StylePreset {
    /// Bitmap the control expects, if it has a display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitmap: Option<BitmapConfig>,

    /// Whether the control has a colour backlight
    #[serde(default)]
    pub colors: bool,

    /// Whether the control renders text itself
    #[serde(default)]
    pub text: bool,
}

/// One addressable control in a layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDefinition {
    pub row: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_preset: Option<String>,
}

/// Controls of a surface plus the style presets they reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceLayout {
    pub style_presets: HashMap<String, StylePreset>,
    pub controls: HashMap<ControlId, ControlDefinition>,
}

impl SurfaceLayout {
    /// Grid layout with controls named `r/c` and a single bitmap preset
    pub fn grid(rows: u32, columns: u32, bitmap: Option<BitmapConfig>) -> Self {
        let mut style_presets = HashMap::new();
        style_presets.insert(
            DEFAULT_STYLE_PRESET.to_string(),
            StylePreset {
                bitmap,
                colors: bitmap.is_none(),
                text: bitmap.is_none(),
            },
        );

        let mut controls = HashMap::new();
        for row in 0..rows {
            for column in 0..columns {
                controls.insert(
                    format!("{}/{}", row, column),
                    ControlDefinition {
                        row,
                        column,
                        style_preset: None,
                    },
                );
            }
        }

        Self {
            style_presets,
            controls,
        }
    }

    pub fn control(&self, control_id: &str) -> Option<&ControlDefinition> {
        self.controls.get(control_id)
    }

    pub fn has_control(&self, control_id: &str) -> bool {
        self.controls.contains_key(control_id)
    }

    /// Preset for a control, falling back to the default preset
    pub fn style_for(&self, control: &ControlDefinition) -> Option<&StylePreset> {
        control
            .style_preset
            .as_deref()
            .and_then(|name| self.style_presets.get(name))
            .or_else(|| self.style_presets.get(DEFAULT_STYLE_PRESET))
    }
}

/// Content to put on one control
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawProps {
    pub control_id: ControlId,

    /// Pixel data in the dimensions and format the control's preset asks for
    pub image: Option<Arc<[u8]>>,

    /// Background colour as `#rrggbb`, for backlit buttons
    pub color: Option<String>,

    /// Text for text-only controls
    pub text: Option<String>,
}

impl DrawProps {
    pub fn new(control_id: impl Into<ControlId>) -> Self {
        Self {
            control_id: control_id.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(Arc::from(image));
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Direction of a custom variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Input,
    Output,
}

/// Custom value a surface reports (t-bar, battery) or accepts (leds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferVariable {
    pub id: String,
    #[serde(rename = "type")]
    pub direction: TransferDirection,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What a surface declares about itself when it is opened
#[derive(Debug, Clone, Default)]
pub struct SurfaceRegisterProps {
    pub brightness: bool,
    pub surface_layout: SurfaceLayout,
    pub transfer_variables: Vec<TransferVariable>,
    pub pincode_map: Option<PincodeMap>,
}

/// Link to a firmware update for a surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareUpdateInfo {
    pub update_url: String,
}

/// Outcome of a driver's firmware update check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareCheck {
    /// Nothing differs from what was last reported
    Unchanged,
    /// New state to report; `None` clears a previously reported update
    Changed(Option<FirmwareUpdateInfo>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Bgra.bytes_per_pixel(), 4);
        let cfg = BitmapConfig { w: 72, h: 72, format: None };
        assert_eq!(cfg.pixel_format(), PixelFormat::Rgb);
        assert_eq!(cfg.blank_bitmap().len(), 72 * 72 * 3);
    }

    #[test]
    fn test_grid_layout() {
        let layout = SurfaceLayout::grid(3, 5, Some(BitmapConfig::new(72, 72, PixelFormat::Rgba)));
        assert_eq!(layout.controls.len(), 15);
        let control = layout.control("2/4").expect("grid control");
        assert_eq!((control.row, control.column), (2, 4));
        let style = layout.style_for(control).expect("default preset");
        assert_eq!(style.bitmap.map(|b| b.byte_len()), Some(72 * 72 * 4));
    }

    #[test]
    fn test_style_falls_back_to_default() {
        let mut layout = SurfaceLayout::grid(1, 1, None);
        let control = ControlDefinition {
            row: 0,
            column: 0,
            style_preset: Some("missing".into()),
        };
        layout.controls.insert("x".into(), control.clone());
        assert!(layout.style_for(&control).is_some_and(|s| s.text));
    }

    #[test]
    fn test_layout_from_yaml() {
        let yaml = r#"
style_presets:
  default:
    bitmap: { w: 96, h: 96, format: bgr }
  strip:
    text: true
controls:
  "0/0": { row: 0, column: 0 }
  lcd: { row: 1, column: 0, style_preset: strip }
"#;
        let layout: SurfaceLayout = serde_yaml::from_str(yaml).expect("layout parses");
        let lcd = layout.control("lcd").expect("lcd control");
        assert!(layout.style_for(lcd).is_some_and(|s| s.text && s.bitmap.is_none()));
    }
}
