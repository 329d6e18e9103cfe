// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Headers of the cubes written by the finalizer.

use std::collections::{BTreeMap, HashMap};

use crate::{
    beam::{median_of_sorted, Beam},
    constants::{JVM_CREDIT, ORIGIN},
    cube::{
        header::{is_beam_keyword, keyword, keyword_in},
        CubeSelection, FitsCube, KeyValue, OutputHeader,
    },
};

/// Keys that the finalizer always writes itself; copies of them from an input
/// header (in any case) are dropped.
const OWN_KEYWORDS: &[&str] = &[
    "ORIGIN",
    "JVMCREDT",
    "CONTINUE",
    "LONGSTRN",
    "JvM_epsilon_max",
    "JvM_epsilon_min",
    "JvM_epsilon_median",
];

/// How far the reference pixel of each output axis moves when the cube is
/// cropped to `selection`.
fn crpix_shift(selection: &CubeSelection) -> HashMap<usize, f64> {
    let mut shift = HashMap::from([(1, selection.x.start as f64), (2, selection.y.start as f64)]);
    if let Some(&first) = selection.channels.first() {
        shift.insert(3, first as f64);
    }
    shift
}

/// The summary statistics of a set of epsilons: (max, min, median).
pub(crate) fn epsilon_stats(epsilon: &BTreeMap<usize, f64>) -> (f64, f64, f64) {
    let mut values: Vec<f64> = epsilon.values().copied().collect();
    values.sort_by(f64::total_cmp);
    let max = values.last().copied().unwrap_or(f64::NAN);
    let min = values.first().copied().unwrap_or(f64::NAN);
    (max, min, median_of_sorted(&values))
}

/// The header of a cropped copy of `cube`: its WCS (moved to the crop),
/// descriptive cards, unit, beam and history.
pub(crate) fn cropped_header(cube: &FitsCube, selection: &CubeSelection) -> OutputHeader {
    let header = cube.header();
    let mut cards = header.wcs_cards(&cube.output_axis_map());
    cards.extend(header.descriptive_cards().cloned());
    cards.extend(
        header
            .cards()
            .iter()
            .filter(|c| {
                let key = keyword(c);
                key.eq_ignore_ascii_case("BUNIT") || is_beam_keyword(key)
            })
            .cloned(),
    );
    OutputHeader {
        keys: cube.output_wcs_keys(&crpix_shift(selection)),
        cards,
        long_strings: vec![],
        history: header.history().map(|s| s.to_string()).collect(),
    }
}

/// The header of the JvM-corrected cube. The WCS comes from the model (it
/// describes the grid the model was convolved on); everything descriptive
/// comes from the image.
pub(crate) fn merged_header(
    model: &FitsCube,
    image: &FitsCube,
    selection: &CubeSelection,
    common_beam: &Beam,
    epsilon: &BTreeMap<usize, f64>,
) -> OutputHeader {
    let mut cards = model.header().wcs_cards(&model.output_axis_map());
    cards.extend(
        image
            .header()
            .descriptive_cards()
            .filter(|c| !keyword_in(keyword(c), OWN_KEYWORDS))
            .cloned(),
    );

    let (eps_max, eps_min, eps_median) = epsilon_stats(epsilon);
    let mut keys = model.output_wcs_keys(&crpix_shift(selection));
    keys.extend([
        ("BUNIT".to_string(), KeyValue::Str("Jy/beam".to_string())),
        ("BMAJ".to_string(), KeyValue::Float(common_beam.major)),
        ("BMIN".to_string(), KeyValue::Float(common_beam.minor)),
        ("BPA".to_string(), KeyValue::Float(common_beam.pa)),
        ("JvM_epsilon_max".to_string(), KeyValue::Float(eps_max)),
        ("JvM_epsilon_min".to_string(), KeyValue::Float(eps_min)),
        ("JvM_epsilon_median".to_string(), KeyValue::Float(eps_median)),
        ("ORIGIN".to_string(), KeyValue::Str(ORIGIN.to_string())),
    ]);

    let mut history: Vec<String> = image.header().history().map(|s| s.to_string()).collect();
    history.push(format!(
        "JvM correction: restored = model * common beam + epsilon * residual ({} channels)",
        epsilon.len()
    ));
    history.push(format!(
        "Common beam {:.4}\" x {:.4}\" PA {:.2} deg",
        common_beam.major * 3600.0,
        common_beam.minor * 3600.0,
        common_beam.pa
    ));
    history.push(format!(
        "Epsilon min {eps_min:.5} median {eps_median:.5} max {eps_max:.5}"
    ));

    OutputHeader {
        keys,
        cards,
        long_strings: vec![(
            "JVMCREDT".to_string(),
            JVM_CREDIT.to_string(),
            "JvM correction credit".to_string(),
        )],
        history,
    }
}

/// The header of the channel-averaged primary beam.
pub(crate) fn flat_pb_header(pb: &FitsCube, selection: &CubeSelection) -> OutputHeader {
    let mut keys = pb.output_wcs_keys(&crpix_shift(selection));
    keys.push(("ORIGIN".to_string(), KeyValue::Str(ORIGIN.to_string())));
    let (first, last) = (
        selection.channels.first().copied().unwrap_or(0),
        selection.channels.last().copied().unwrap_or(0),
    );
    OutputHeader {
        keys,
        cards: pb.header().wcs_cards(&pb.output_axis_map()),
        long_strings: vec![],
        history: vec![format!(
            "Mean of the primary beam over {} channels ({first} to {last})",
            selection.channels.len()
        )],
    }
}
