// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FITS header cards.
//!
//! Headers are kept as the verbatim 80-character cards that cfitsio reads, so
//! that anything not understood here is copied to outputs unchanged.

use std::collections::HashMap;

/// The width of a FITS header card.
const CARD_WIDTH: usize = 80;

/// Keywords that describe the layout of an HDU rather than its contents.
/// These are always written by cfitsio itself.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "BITPIX", "EXTEND", "BSCALE", "BZERO", "BLANK", "XTENSION", "PCOUNT", "GCOUNT",
    "CHECKSUM", "DATASUM", "DATAMIN", "DATAMAX", "END",
];

/// Per-axis WCS keyword prefixes (e.g. "CTYPE3").
const WCS_AXIS_PREFIXES: &[&str] = &["CTYPE", "CRVAL", "CDELT", "CRPIX", "CUNIT", "CROTA", "CNAME", "CRDER", "CSYER"];

/// WCS keywords that don't belong to a single axis.
const WCS_GLOBAL_KEYWORDS: &[&str] = &[
    "WCSAXES", "WCSNAME", "RADESYS", "RADECSYS", "EQUINOX", "EPOCH", "LONPOLE", "LATPOLE",
    "SPECSYS", "SSYSOBS", "SSYSSRC", "RESTFRQ", "RESTFREQ", "RESTWAV", "VELREF", "VELOSYS",
    "ZSOURCE", "ALTRVAL", "ALTRPIX", "MJD-OBS", "MJDREF", "DATE-OBS", "TIMESYS", "OBSGEO-X",
    "OBSGEO-Y", "OBSGEO-Z",
];

const BEAM_KEYWORDS: &[&str] = &["BMAJ", "BMIN", "BPA", "CASAMBM"];

/// The keyword of a card. HIERARCH cards give the keyword after "HIERARCH".
pub fn keyword(card: &str) -> &str {
    if let Some(rest) = card.strip_prefix("HIERARCH ") {
        return match rest.find('=') {
            Some(i) => rest[..i].trim(),
            None => rest.trim(),
        };
    }
    card.get(..8).unwrap_or(card).trim_end()
}

/// FITS keywords are case-insensitive; cfitsio upper-cases HIERARCH keywords
/// when writing them.
pub(crate) fn keyword_in(key: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Axis-numbered WCS keywords: returns the prefix and the axis number(s).
/// "CRPIX3" gives ("CRPIX", 3, None), "PC1_2" gives ("PC", 1, Some(2)).
fn parse_axis_keyword(key: &str) -> Option<(&'static str, usize, Option<usize>)> {
    let key = key.to_ascii_uppercase();
    for &prefix in WCS_AXIS_PREFIXES {
        if let Some(n) = key.strip_prefix(prefix) {
            if let Ok(n) = n.parse() {
                return Some((prefix, n, None));
            }
        }
    }
    for prefix in ["PC", "CD", "PV", "PS"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            if let Some((i, j)) = rest.split_once('_') {
                if let (Ok(i), Ok(j)) = (i.parse(), j.parse()) {
                    return Some((prefix, i, Some(j)));
                }
            }
        }
    }
    None
}

pub(crate) fn is_structural_keyword(key: &str) -> bool {
    keyword_in(key, STRUCTURAL_KEYWORDS)
        || key
            .get(..5)
            .is_some_and(|p| p.eq_ignore_ascii_case("NAXIS") && key[5..].chars().all(|c| c.is_ascii_digit()))
}

pub(crate) fn is_wcs_keyword(key: &str) -> bool {
    keyword_in(key, WCS_GLOBAL_KEYWORDS) || parse_axis_keyword(key).is_some()
}

pub(crate) fn is_beam_keyword(key: &str) -> bool {
    keyword_in(key, BEAM_KEYWORDS)
}

/// The cards of a FITS header. Values are never interpreted here; typed keys
/// are read through cfitsio (see [`crate::cube::FitsCube`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<String>,
}

impl Header {
    pub fn new(cards: Vec<String>) -> Header {
        Header { cards }
    }

    pub fn cards(&self) -> &[String] {
        &self.cards
    }

    /// Cards with this keyword.
    pub fn cards_with_keyword<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a String> {
        self.cards
            .iter()
            .filter(move |c| keyword(c).eq_ignore_ascii_case(key))
    }

    /// The text of every HISTORY card.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.cards_with_keyword("HISTORY")
            .map(|c| c.get(8..).unwrap_or("").trim_end())
    }

    /// Cards that aren't structural, WCS, beam or unit related, and aren't
    /// HISTORY. These are "everything else" that should follow the data
    /// around.
    pub(crate) fn descriptive_cards(&self) -> impl Iterator<Item = &String> {
        self.cards.iter().filter(|c| {
            let key = keyword(c);
            !(key.is_empty()
                || keyword_in(key, &["HISTORY", "BUNIT"])
                || is_structural_keyword(key)
                || is_wcs_keyword(key)
                || is_beam_keyword(key))
        })
    }

    /// The WCS cards of this header, renumbered to the output axes. `axis_map`
    /// maps a 1-indexed input axis to its 1-indexed output axis; axes that
    /// aren't in the map (e.g. Stokes) are dropped along with any card that
    /// refers to them. WCSAXES and CRPIXn carry values that change with the
    /// output, so they are left out and written as keys instead.
    pub(crate) fn wcs_cards(&self, axis_map: &HashMap<usize, usize>) -> Vec<String> {
        let mut out = vec![];
        for card in &self.cards {
            let key = keyword(card);
            if keyword_in(key, WCS_GLOBAL_KEYWORDS) {
                if !key.eq_ignore_ascii_case("WCSAXES") {
                    out.push(card.clone());
                }
                continue;
            }

            let Some((prefix, i, j)) = parse_axis_keyword(key) else {
                continue;
            };
            if prefix == "CRPIX" {
                continue;
            }
            let Some(&new_i) = axis_map.get(&i) else {
                continue;
            };
            let new_key = match j {
                None => format!("{prefix}{new_i}"),
                Some(j) => match axis_map.get(&j) {
                    // PVi_m and PSi_m are parameters, not axis pairs.
                    _ if prefix == "PV" || prefix == "PS" => format!("{prefix}{new_i}_{j}"),
                    Some(&new_j) => format!("{prefix}{new_i}_{new_j}"),
                    None => continue,
                },
            };
            out.push(rekey_card(card, &new_key));
        }
        out
    }
}

/// Replace the keyword of a (non-HIERARCH) card.
fn rekey_card(card: &str, new_key: &str) -> String {
    let rest = card.get(8..).unwrap_or("");
    let mut card = format!("{new_key:<8}{rest}");
    if card.len() > CARD_WIDTH {
        let mut end = CARD_WIDTH;
        while !card.is_char_boundary(end) {
            end -= 1;
        }
        card.truncate(end);
    }
    format!("{card:<CARD_WIDTH$}")
}
