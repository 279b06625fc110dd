/*
 *  surface/pincode.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Pincode maps and the lock controller deciding what to draw while locked
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

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::SurfaceError;
use super::types::ControlId;

/// Digit -> control id for one page of the keypad
pub type PincodePage = BTreeMap<u8, ControlId>;

/// Which controls act as the keypad while a surface is locked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PincodeMap {
    /// Surface draws its own pincode UI
    Custom,
    SinglePage {
        #[serde(default)]
        pincode: Option<ControlId>,
        digits: PincodePage,
    },
    MultiplePage {
        pincode: ControlId,
        next_page: ControlId,
        pages: Vec<PincodePage>,
    },
}

impl PincodeMap {
    /// Control showing the masked entry, if any
    pub fn status_control(&self) -> Option<&ControlId> {
        match self {
            PincodeMap::Custom => None,
            PincodeMap::SinglePage { pincode, .. } => pincode.as_ref(),
            PincodeMap::MultiplePage { pincode, .. } => Some(pincode),
        }
    }

    pub fn page_count(&self) -> usize {
        match self {
            PincodeMap::Custom => 0,
            PincodeMap::SinglePage { .. } => 1,
            PincodeMap::MultiplePage { pages, .. } => pages.len(),
        }
    }

    pub fn page(&self, index: usize) -> Option<&PincodePage> {
        match self {
            PincodeMap::Custom => None,
            PincodeMap::SinglePage { digits, .. } => Some(digits),
            PincodeMap::MultiplePage { pages, .. } => pages.get(index),
        }
    }

    /// Digits must be 0-9 and a control may only appear once per page
    pub fn validate(&self) -> Result<(), SurfaceError> {
        let pages: Vec<&PincodePage> = match self {
            PincodeMap::Custom => return Ok(()),
            PincodeMap::SinglePage { digits, .. } => vec![digits],
            PincodeMap::MultiplePage { pages, .. } => {
                if pages.is_empty() {
                    return Err(SurfaceError::InvalidPincodeMap(
                        "multiple-page map has no pages".into(),
                    ));
                }
                pages.iter().collect()
            }
        };

        for (index, page) in pages.into_iter().enumerate() {
            let mut seen = HashSet::new();
            for (digit, control_id) in page {
                if *digit > 9 {
                    return Err(SurfaceError::InvalidPincodeMap(format!(
                        "page {} maps digit {} which is not 0-9",
                        index, digit
                    )));
                }
                if !seen.insert(control_id) {
                    return Err(SurfaceError::InvalidPincodeMap(format!(
                        "page {} maps control {} more than once",
                        index, control_id
                    )));
                }
                if self.status_control() == Some(control_id) {
                    return Err(SurfaceError::InvalidPincodeMap(format!(
                        "control {} is both a digit and the pincode display",
                        control_id
                    )));
                }
                if let PincodeMap::MultiplePage { next_page, .. } = self {
                    if next_page == control_id {
                        return Err(SurfaceError::InvalidPincodeMap(format!(
                            "control {} is both a digit and the next page key",
                            control_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// What to render on a keypad control
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PincodeGlyph {
    Digit(u8),
    NextPage,
    /// Masked entry, one mask character per digit typed so far
    Mask(usize),
    /// Empty the control
    Clear,
}

impl PincodeGlyph {
    /// Text sent to text-only controls
    pub fn text(&self) -> String {
        match self {
            PincodeGlyph::Digit(digit) => digit.to_string(),
            PincodeGlyph::NextPage => "+".to_string(),
            PincodeGlyph::Mask(count) => "*".repeat(*count),
            PincodeGlyph::Clear => String::new(),
        }
    }

    /// Colour sent to backlit controls
    pub fn color(&self) -> &'static str {
        match self {
            PincodeGlyph::Clear => "#000000",
            _ => "#ffffff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PincodeDraw {
    pub control_id: ControlId,
    pub glyph: PincodeGlyph,
}

impl PincodeDraw {
    fn new(control_id: &str, glyph: PincodeGlyph) -> Self {
        Self {
            control_id: control_id.to_string(),
            glyph,
        }
    }
}

/// Result of a lock state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockUpdate {
    /// The surface went from unlocked to locked
    pub newly_locked: bool,
    pub draws: Vec<PincodeDraw>,
}

/// Result of a press while locked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PincodePress {
    Digit(u8),
    PageChanged(Vec<PincodeDraw>),
    Ignored,
}

/// Lock state of one surface
#[derive(Debug, Clone, Default)]
pub struct PincodeLock {
    map: Option<PincodeMap>,
    locked: bool,
    page: usize,
    character_count: usize,
    last_page_draw: HashSet<ControlId>,
}

impl PincodeLock {
    pub fn new(map: Option<PincodeMap>) -> Self {
        Self {
            map,
            ..Default::default()
        }
    }

    pub fn map(&self) -> Option<&PincodeMap> {
        self.map.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn current_page_index(&self) -> usize {
        self.page
    }

    pub fn character_count(&self) -> usize {
        self.character_count
    }

    /// Apply a new lock state. Locking renders the whole keypad, further
    /// locked updates only refresh the masked entry, unlocking draws nothing.
    pub fn set_locked(&mut self, locked: bool, character_count: usize) -> LockUpdate {
        let newly_locked = !self.locked && locked;
        if newly_locked {
            self.page = 0;
        }
        self.locked = locked;
        self.character_count = character_count;

        let draws = match (locked, newly_locked) {
            (false, _) => Vec::new(),
            (true, true) => self.full_page(),
            (true, false) => self.mask().into_iter().collect(),
        };
        LockUpdate {
            newly_locked,
            draws,
        }
    }

    /// Route a press received while locked
    pub fn press(&mut self, control_id: &str) -> PincodePress {
        if !self.locked {
            return PincodePress::Ignored;
        }

        if let Some(PincodeMap::MultiplePage {
            next_page, pages, ..
        }) = &self.map
        {
            if next_page == control_id {
                self.page = (self.page + 1) % pages.len().max(1);
                return PincodePress::PageChanged(self.full_page());
            }
        }

        self.current_page()
            .and_then(|page| {
                page.iter()
                    .find(|(_, id)| id.as_str() == control_id)
                    .map(|(digit, _)| *digit)
            })
            .map_or(PincodePress::Ignored, PincodePress::Digit)
    }

    /// Every draw needed to show the current keypad page
    pub fn full_page(&mut self) -> Vec<PincodeDraw> {
        if !self.locked {
            return Vec::new();
        }

        let mut draws: Vec<PincodeDraw> = self.mask().into_iter().collect();

        let drawn: Vec<PincodeDraw> = self
            .current_page()
            .map(|page| {
                page.iter()
                    .map(|(digit, id)| PincodeDraw::new(id, PincodeGlyph::Digit(*digit)))
                    .collect()
            })
            .unwrap_or_default();

        let previous = std::mem::replace(
            &mut self.last_page_draw,
            drawn.iter().map(|d| d.control_id.clone()).collect(),
        );
        draws.extend(drawn);

        let mut cleared: Vec<&ControlId> = previous
            .iter()
            .filter(|id| !self.last_page_draw.contains(*id))
            .collect();
        cleared.sort();
        draws.extend(
            cleared
                .into_iter()
                .map(|id| PincodeDraw::new(id, PincodeGlyph::Clear)),
        );

        if let Some(PincodeMap::MultiplePage { next_page, .. }) = &self.map {
            draws.push(PincodeDraw::new(next_page, PincodeGlyph::NextPage));
        }
        draws
    }

    fn mask(&self) -> Option<PincodeDraw> {
        let status = self.map.as_ref()?.status_control()?;
        Some(PincodeDraw::new(
            status,
            PincodeGlyph::Mask(self.character_count),
        ))
    }

    fn current_page(&mut self) -> Option<&PincodePage> {
        let count = self.map.as_ref()?.page_count();
        if self.page >= count {
            self.page = 0;
        }
        self.map.as_ref()?.page(self.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_page() -> PincodeMap {
        PincodeMap::SinglePage {
            pincode: Some("disp".into()),
            digits: ('a'..='j')
                .enumerate()
                .map(|(digit, id)| (digit as u8, id.to_string()))
                .collect(),
        }
    }

    fn multi_page() -> PincodeMap {
        PincodeMap::MultiplePage {
            pincode: "disp".into(),
            next_page: "next".into(),
            pages: vec![
                BTreeMap::from([(0, "k0".into()), (1, "k1".into()), (2, "k2".into())]),
                BTreeMap::from([(3, "k0".into()), (4, "k1".into())]),
                BTreeMap::from([(5, "k2".into())]),
            ],
        }
    }

    fn ids(draws: &[PincodeDraw], glyph: fn(&PincodeGlyph) -> bool) -> Vec<&str> {
        draws
            .iter()
            .filter(|d| glyph(&d.glyph))
            .map(|d| d.control_id.as_str())
            .collect()
    }

    #[test]
    fn test_lock_renders_full_page_then_only_mask() {
        let mut lock = PincodeLock::new(Some(single_page()));

        let first = lock.set_locked(true, 0);
        assert!(first.newly_locked);
        assert_eq!(first.draws[0], PincodeDraw::new("disp", PincodeGlyph::Mask(0)));
        assert_eq!(ids(&first.draws, |g| matches!(g, PincodeGlyph::Digit(_))).len(), 10);
        assert!(ids(&first.draws, |g| *g == PincodeGlyph::Clear).is_empty());

        let second = lock.set_locked(true, 3);
        assert!(!second.newly_locked);
        assert_eq!(
            second.draws,
            vec![PincodeDraw::new("disp", PincodeGlyph::Mask(3))]
        );
        assert_eq!(second.draws[0].glyph.text(), "***");
    }

    #[test]
    fn test_unlock_draws_nothing() {
        let mut lock = PincodeLock::new(Some(single_page()));
        lock.set_locked(true, 0);
        let update = lock.set_locked(false, 0);
        assert!(update.draws.is_empty());
        assert!(!lock.is_locked());
        assert_eq!(lock.press("c"), PincodePress::Ignored);
    }

    #[test]
    fn test_reverse_digit_lookup() {
        let mut lock = PincodeLock::new(Some(single_page()));
        lock.set_locked(true, 0);
        assert_eq!(lock.press("c"), PincodePress::Digit(2));
        assert_eq!(lock.press("j"), PincodePress::Digit(9));
        assert_eq!(lock.press("zz"), PincodePress::Ignored);
        assert_eq!(lock.press("disp"), PincodePress::Ignored);
    }

    #[test]
    fn test_multi_page_cycles_and_clears_missing_controls() {
        let mut lock = PincodeLock::new(Some(multi_page()));
        let first = lock.set_locked(true, 0);
        assert_eq!(ids(&first.draws, |g| *g == PincodeGlyph::NextPage), vec!["next"]);
        assert_eq!(lock.press("k1"), PincodePress::Digit(1));

        let PincodePress::PageChanged(second) = lock.press("next") else {
            panic!("next page press must re-render");
        };
        assert_eq!(lock.current_page_index(), 1);
        assert_eq!(ids(&second, |g| *g == PincodeGlyph::Clear), vec!["k2"]);
        assert_eq!(lock.press("k1"), PincodePress::Digit(4));
        assert_eq!(lock.press("k2"), PincodePress::Ignored);

        let PincodePress::PageChanged(third) = lock.press("next") else {
            panic!("next page press must re-render");
        };
        assert_eq!(ids(&third, |g| matches!(g, PincodeGlyph::Digit(_))), vec!["k2"]);
        assert_eq!(ids(&third, |g| *g == PincodeGlyph::Clear), vec!["k0", "k1"]);

        assert!(matches!(lock.press("next"), PincodePress::PageChanged(_)));
        assert_eq!(lock.current_page_index(), 0);
    }

    #[test]
    fn test_relock_resets_page() {
        let mut lock = PincodeLock::new(Some(multi_page()));
        lock.set_locked(true, 0);
        lock.press("next");
        lock.set_locked(false, 0);
        lock.set_locked(true, 0);
        assert_eq!(lock.current_page_index(), 0);
    }

    #[test]
    fn test_custom_map_has_no_builtin_handling() {
        let mut lock = PincodeLock::new(Some(PincodeMap::Custom));
        assert!(lock.set_locked(true, 0).draws.is_empty());
        assert_eq!(lock.press("a"), PincodePress::Ignored);
    }

    #[test]
    fn test_validate() {
        assert!(single_page().validate().is_ok());
        assert!(multi_page().validate().is_ok());

        let bad_digit = PincodeMap::SinglePage {
            pincode: None,
            digits: BTreeMap::from([(10, "a".into())]),
        };
        assert!(matches!(bad_digit.validate(), Err(SurfaceError::InvalidPincodeMap(_))));

        let duplicate = PincodeMap::SinglePage {
            pincode: None,
            digits: BTreeMap::from([(1, "a".into()), (2, "a".into())]),
        };
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_map_from_yaml() {
        let yaml = r#"
type: multiple-page
pincode: "0/0"
next_page: "0/4"
pages:
  - { 1: "1/0", 2: "1/1" }
  - { 3: "1/0" }
"#;
        let map: PincodeMap = serde_yaml::from_str(yaml).expect("map parses");
        assert_eq!(map.page_count(), 2);
        assert_eq!(map.status_control().map(String::as_str), Some("0/0"));
        assert!(map.validate().is_ok());
    }
}
