// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Finalizing the cubes of an imaging run: the JvM correction, primary-beam
//! correction and data-release copies.
//!
//! All the products of one run share a basename, e.g. for the basename
//! `G333.60_B3_spw0_12M` there is `G333.60_B3_spw0_12M.image.fits`,
//! `G333.60_B3_spw0_12M.model.fits` and so on. [`CubeFinalizer`] reads those
//! and writes `G333.60_B3_spw0_12M.JvM.image.fits` (and friends).

mod error;
mod metadata;
mod minimize;

pub use error::FinalizeError;
pub use minimize::{minimized_copy_paths, write_minimized_copies, MinimizedCopies};

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    thread::{self, ScopedJoinHandle},
    time::Instant,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use ndarray::prelude::*;
use scopeguard::defer_on_unwind;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::{
    beam::{identify_bad_beams, Beam, BeamFitAttempt, PerChannelBeamTable},
    config::RuntimeConfig,
    constants::{
        DEFAULT_BAD_BEAM_THRESHOLD, DEFAULT_BEAM_FIT_ATTEMPTS, DEFAULT_MAX_NPIX_PEAK,
        PLANE_QUEUE_DEPTH,
    },
    cube::{ChannelStream, CubeError, CubeSelection, CubeWriter, FitsCube, OutputHeader},
    jvm::{epsilon_from_psf, rescale_plane, ModelConvolver, RescaleError},
    misc::{expensive_op, pretty_duration},
    PROGRESS_BARS,
};

/// The products of an imaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CubeVariant {
    Image,
    Model,
    Residual,
    Psf,
    Pb,
}

/// `path` with `suffix` appended to its final component.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Does this file start like a FITS file?
fn is_fits_file(path: &Path) -> bool {
    let mut magic = [0; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|()| &magic == b"SIMPLE")
        .unwrap_or(false)
}

impl CubeVariant {
    /// The file names tried for this variant, in order of preference.
    pub fn candidate_paths(self, basename: &Path) -> [PathBuf; 2] {
        [
            with_suffix(basename, &format!(".{self}.fits")),
            with_suffix(basename, &format!(".{self}")),
        ]
    }

    /// Find the FITS file of this variant of `basename`.
    pub fn resolve(self, basename: &Path) -> Result<PathBuf, FinalizeError> {
        let [fits, bare] = self.candidate_paths(basename);
        if fits.is_file() {
            Ok(fits)
        } else if bare.is_file() && is_fits_file(&bare) {
            Ok(bare)
        } else {
            Err(FinalizeError::MissingInput {
                basename: basename.to_path_buf(),
                variant: self,
                tried: vec![fits, bare],
            })
        }
    }
}

/// What to do when finalizing a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeOptions {
    /// Also write a primary-beam-corrected cube. This needs the pb cube.
    pub pbcor: bool,

    /// Crop everything to the finite pixels of the image and to the channels
    /// that are kept.
    pub minimize: bool,

    /// The half-size \[pixels\] of the PSF cutout used to find the first null.
    pub max_npix_peak: usize,

    /// Tolerances to try, in order, when fitting the common beam.
    pub beam_fit_attempts: Vec<BeamFitAttempt>,

    /// Beams that differ from the median beam by more than this fraction are
    /// bad. `None` only rejects unphysical beams.
    pub bad_beam_threshold: Option<f64>,

    /// Write compressed, cropped copies of the model and residual.
    pub write_minimized_copies: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        FinalizeOptions {
            pbcor: true,
            minimize: true,
            max_npix_peak: DEFAULT_MAX_NPIX_PEAK,
            beam_fit_attempts: DEFAULT_BEAM_FIT_ATTEMPTS
                .iter()
                .map(|&(tolerance, reason)| BeamFitAttempt::new(tolerance, reason))
                .collect(),
            bad_beam_threshold: Some(DEFAULT_BAD_BEAM_THRESHOLD),
            write_minimized_copies: true,
        }
    }
}

/// Everything produced by [`CubeFinalizer::beam_correct_cube`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutputs {
    pub jvm_image: PathBuf,
    pub pbcor_image: Option<PathBuf>,
    pub flat_pb: Option<PathBuf>,
    pub minimized_copies: Option<MinimizedCopies>,
    pub common_beam: Beam,
    /// Keyed by original channel index.
    pub epsilon: BTreeMap<usize, f64>,
    /// Channels that were excluded because of their beam or PSF.
    pub bad_channels: Vec<usize>,
    /// What was kept of the input cubes.
    pub selection: CubeSelection,
}

/// The input cubes of one imaging run.
struct Inputs {
    image: FitsCube,
    model: FitsCube,
    residual: FitsCube,
    psf: FitsCube,
    pb: Option<FitsCube>,
}

impl Inputs {
    fn open(basename: &Path, require_pb: bool) -> Result<Inputs, FinalizeError> {
        let open = |variant: CubeVariant| -> Result<FitsCube, FinalizeError> {
            let path = variant.resolve(basename)?;
            debug!("Using {} as the {variant} cube", path.display());
            Ok(FitsCube::open(path)?)
        };
        let image = open(CubeVariant::Image)?;
        let model = open(CubeVariant::Model)?;
        let residual = open(CubeVariant::Residual)?;
        let psf = open(CubeVariant::Psf)?;
        let pb = match open(CubeVariant::Pb) {
            Ok(pb) => Some(pb),
            Err(e @ FinalizeError::MissingInput { .. }) => {
                if require_pb {
                    return Err(e);
                }
                debug!("No primary beam for {}", basename.display());
                None
            }
            Err(e) => return Err(e),
        };

        let expected = image.shape();
        for (variant, cube) in [
            (CubeVariant::Model, Some(&model)),
            (CubeVariant::Residual, Some(&residual)),
            (CubeVariant::Psf, Some(&psf)),
            (CubeVariant::Pb, pb.as_ref()),
        ] {
            if let Some(cube) = cube {
                if cube.shape() != expected {
                    return Err(FinalizeError::ShapeMismatch {
                        variant,
                        expected,
                        got: cube.shape(),
                    });
                }
            }
        }

        Ok(Inputs {
            image,
            model,
            residual,
            psf,
            pb,
        })
    }
}

/// Flag channels with bad beams or with a PSF whose peak isn't positive.
fn identify_bad_channels(
    psf: &FitsCube,
    beams: &PerChannelBeamTable,
    threshold: Option<f64>,
) -> Result<Vec<bool>, FinalizeError> {
    let mut bad = identify_bad_beams(beams, threshold);
    // Channels without a beam are bad too.
    bad.resize(psf.num_chans(), true);
    let num_bad_beams = bad.iter().filter(|&&b| b).count();
    if num_bad_beams > 0 {
        warn!("{num_bad_beams} channels have bad beams");
    }

    let mut num_degenerate = 0;
    for plane in ChannelStream::new(psf.reader()?) {
        let (chan, plane) = plane?;
        let peak = plane
            .iter()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        if !(peak > 0.0) {
            trace!("Channel {chan}: PSF peak is {peak}");
            num_degenerate += 1;
            bad[chan] = true;
        }
    }
    if num_degenerate > 0 {
        warn!("{num_degenerate} channels have a PSF peak <= 0 and are excluded");
    }
    Ok(bad)
}

/// A model and residual plane on their way to being combined.
struct PlanePair {
    index: usize,
    chan: usize,
    model: Array2<f32>,
    residual: Array2<f32>,
    pb: Option<Array2<f32>>,
}

/// A finished plane on its way to being written.
struct RestoredPlane {
    index: usize,
    restored: Array2<f32>,
    pbcor: Option<Array2<f32>>,
    pb: Option<Array2<f32>>,
}

/// The files written by the pipeline.
struct Written {
    jvm_image: PathBuf,
    pbcor_image: Option<PathBuf>,
    flat_pb: Option<PathBuf>,
}

pub struct CubeFinalizer {
    config: RuntimeConfig,
}

impl CubeFinalizer {
    pub fn new(config: RuntimeConfig) -> CubeFinalizer {
        CubeFinalizer { config }
    }

    /// JvM-correct the cubes of `basename`. Every output is written to a
    /// temporary file first, so if this returns an error, no partial outputs
    /// are left behind.
    pub fn beam_correct_cube(
        &self,
        basename: &Path,
        options: &FinalizeOptions,
    ) -> Result<FinalizeOutputs, FinalizeError> {
        info!("Finalizing {}", basename.display());
        let total_start = Instant::now();

        // Open the inputs.
        let start = Instant::now();
        let inputs = Inputs::open(basename, options.pbcor)?;
        let (num_chans, ny, nx) = inputs.image.shape();
        info!(
            "Opened {num_chans} channels of {ny} x {nx} pixels ({})",
            pretty_duration(start.elapsed())
        );

        // Which channels can be used?
        let start = Instant::now();
        let beams = inputs
            .psf
            .beams()
            .or_else(|| inputs.image.beams())
            .ok_or_else(|| FinalizeError::NoBeams {
                basename: basename.to_path_buf(),
            })?;
        let bad = identify_bad_channels(&inputs.psf, beams, options.bad_beam_threshold)?;
        let good_chans: Vec<usize> = (0..num_chans).filter(|&c| !bad[c]).collect();
        let bad_channels: Vec<usize> = (0..num_chans).filter(|&c| bad[c]).collect();
        if good_chans.is_empty() {
            return Err(FinalizeError::NoGoodChannels {
                basename: basename.to_path_buf(),
            });
        }
        info!(
            "Using {} of {num_chans} channels ({})",
            good_chans.len(),
            pretty_duration(start.elapsed())
        );

        // Crop.
        let start = Instant::now();
        let full = CubeSelection {
            channels: good_chans.clone(),
            y: 0..ny,
            x: 0..nx,
        };
        let selection = if options.minimize {
            let stream = ChannelStream::selected(inputs.image.reader()?, full.clone());
            match minimize::finite_extent(stream)? {
                Some(s) => s,
                None => {
                    warn!("The image has no finite pixels in any good channel; not cropping");
                    full
                }
            }
        } else {
            full
        };
        if !selection.is_contiguous() {
            warn!(
                "The kept channels aren't contiguous; the spectral axis describes channel {} and the CHANNEL column of the epsilon table has every channel's original index",
                selection.channels[0]
            );
        }
        let (out_ny, out_nx) = selection.plane_shape();
        let num_planes = selection.channels.len();
        info!(
            "Output cubes are {num_planes} x {out_ny} x {out_nx} (y {:?}, x {:?}) ({})",
            selection.y,
            selection.x,
            pretty_duration(start.elapsed())
        );

        let minimized_copies = if options.minimize && options.write_minimized_copies {
            let start = Instant::now();
            let scratch = self.config.scratch_tempdir()?;
            let copies = write_minimized_copies(
                basename,
                &inputs.model,
                &inputs.residual,
                &selection,
                scratch.path(),
            )?;
            debug!("Minimized copies took {}", pretty_duration(start.elapsed()));
            Some(copies)
        } else {
            None
        };

        // Epsilon and the common beam.
        let start = Instant::now();
        let pool = self.config.thread_pool()?;
        let psf_selection = CubeSelection {
            channels: selection.channels.clone(),
            y: 0..ny,
            x: 0..nx,
        };
        let pixel_area = inputs.psf.pixel_area();
        let eps = expensive_op(
            || {
                let psf_stream = ChannelStream::selected(inputs.psf.reader()?, psf_selection);
                epsilon_from_psf(
                    psf_stream,
                    beams,
                    pixel_area,
                    options.max_npix_peak,
                    &options.beam_fit_attempts,
                    &pool,
                )
            },
            "Still measuring the dirty beams",
        )?;
        let common_beam = eps.common_beam;
        info!("Common beam: {common_beam}");
        let (eps_max, eps_min, eps_median) = metadata::epsilon_stats(&eps.epsilon);
        info!(
            "Epsilon min {eps_min:.5}, median {eps_median:.5}, max {eps_max:.5} ({})",
            pretty_duration(start.elapsed())
        );

        // Convolve, rescale and write.
        let start = Instant::now();
        let header = metadata::merged_header(
            &inputs.model,
            &inputs.image,
            &selection,
            &common_beam,
            &eps.epsilon,
        );
        let convolver = ModelConvolver::new(common_beam, inputs.model.pixel_area(), (out_ny, out_nx))?;
        let jvm_dest = with_suffix(basename, ".JvM.image.fits");
        let pbcor_dest = (options.pbcor && inputs.pb.is_some())
            .then(|| with_suffix(basename, ".JvM.image.pbcor.fits"));
        let flat_pb_dest = inputs.pb.as_ref().map(|pb| {
            (
                with_suffix(basename, ".flatpb.fits"),
                metadata::flat_pb_header(pb, &selection),
            )
        });
        let written = run_pipeline(
            &inputs,
            &selection,
            &convolver,
            &eps.epsilon,
            &header,
            Destinations {
                jvm: &jvm_dest,
                pbcor: pbcor_dest.as_deref(),
                flat_pb: flat_pb_dest.as_ref().map(|(dest, header)| (dest.as_path(), header)),
            },
        )?;
        info!(
            "Wrote {} ({})",
            written.jvm_image.display(),
            pretty_duration(start.elapsed())
        );

        info!(
            "Finished {} in {}",
            basename.display(),
            pretty_duration(total_start.elapsed())
        );
        Ok(FinalizeOutputs {
            jvm_image: written.jvm_image,
            pbcor_image: written.pbcor_image,
            flat_pb: written.flat_pb,
            minimized_copies,
            common_beam,
            epsilon: eps.epsilon,
            bad_channels,
            selection,
        })
    }
}

fn progress_bar(multi_progress: &MultiProgress, len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as _)
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:17}: [{wide_bar:.blue}] {pos:3}/{len:3} channels ({elapsed_precise}<{eta_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message(message);
    multi_progress.add(pb)
}

/// Where the pipeline writes. Nothing appears at any of these paths until every
/// output has been written in full.
#[derive(Clone, Copy)]
struct Destinations<'a> {
    jvm: &'a Path,
    pbcor: Option<&'a Path>,
    /// The channel-averaged primary beam and its header.
    flat_pb: Option<(&'a Path, &'a OutputHeader)>,
}

/// Stream the selected planes through the reader, compute and writer threads.
fn run_pipeline(
    inputs: &Inputs,
    selection: &CubeSelection,
    convolver: &ModelConvolver,
    epsilon: &BTreeMap<usize, f64>,
    header: &OutputHeader,
    dests: Destinations,
) -> Result<Written, FinalizeError> {
    let num_planes = selection.channels.len();

    let (tx_compute, rx_compute) = bounded(PLANE_QUEUE_DEPTH);
    let (tx_write, rx_write) = bounded(PLANE_QUEUE_DEPTH);

    let multi_progress = MultiProgress::with_draw_target(if PROGRESS_BARS.load() {
        ProgressDrawTarget::stdout()
    } else {
        ProgressDrawTarget::hidden()
    });
    let read_progress = progress_bar(&multi_progress, num_planes, "Reading planes");
    let compute_progress = progress_bar(&multi_progress, num_planes, "Convolving");
    let write_progress = progress_bar(&multi_progress, num_planes, "Writing planes");

    // Use a variable to track whether any threads have an issue.
    let error = AtomicCell::new(false);

    thread::scope(|scope| {
        let read_handle: ScopedJoinHandle<Result<(), CubeError>> = thread::Builder::new()
            .name("read".to_string())
            .spawn_scoped(scope, || {
                defer_on_unwind! { error.store(true); }
                read_progress.tick();

                let result = read_thread(inputs, selection, tx_compute, &error, &read_progress);
                if result.is_err() {
                    error.store(true);
                }
                result
            })
            .expect("OS can create threads");

        let compute_handle: ScopedJoinHandle<Result<(), RescaleError>> = thread::Builder::new()
            .name("compute".to_string())
            .spawn_scoped(scope, || {
                defer_on_unwind! { error.store(true); }
                compute_progress.tick();

                let result = compute_thread(
                    convolver,
                    epsilon,
                    dests.pbcor.is_some(),
                    rx_compute,
                    tx_write,
                    &error,
                    &compute_progress,
                );
                if result.is_err() {
                    error.store(true);
                }
                result
            })
            .expect("OS can create threads");

        let write_handle: ScopedJoinHandle<Result<Written, FinalizeError>> = thread::Builder::new()
            .name("write".to_string())
            .spawn_scoped(scope, || {
                defer_on_unwind! { error.store(true); }
                write_progress.tick();

                let result = write_thread(
                    header,
                    num_planes,
                    selection.plane_shape(),
                    epsilon,
                    dests,
                    rx_write,
                    &error,
                    &write_progress,
                );
                if result.is_err() {
                    error.store(true);
                }
                result
            })
            .expect("OS can create threads");

        // Join all thread handles. Earlier threads' errors take precedence;
        // later threads usually only fail because an earlier one did.
        read_handle.join().unwrap()?;
        compute_handle.join().unwrap()?;
        write_handle.join().unwrap()
    })
}

fn read_thread(
    inputs: &Inputs,
    selection: &CubeSelection,
    tx: Sender<PlanePair>,
    error: &AtomicCell<bool>,
    progress_bar: &ProgressBar,
) -> Result<(), CubeError> {
    let model = ChannelStream::selected(inputs.model.reader()?, selection.clone());
    let mut residual = ChannelStream::selected(inputs.residual.reader()?, selection.clone());
    let mut pb = match &inputs.pb {
        Some(pb) => Some(ChannelStream::selected(pb.reader()?, selection.clone())),
        None => None,
    };

    for (index, model_plane) in model.enumerate() {
        let (chan, model) = model_plane?;
        let residual = match residual.next() {
            Some(plane) => plane?.1,
            None => break,
        };
        let pb = match pb.as_mut().and_then(|s| s.next()) {
            Some(plane) => Some(plane?.1),
            None => None,
        };

        // Should we continue?
        if error.load() {
            return Ok(());
        }
        match tx.send(PlanePair {
            index,
            chan,
            model,
            residual,
            pb,
        }) {
            Ok(()) => (),
            // The receiver only hangs up if it hit an error.
            Err(_) => return Ok(()),
        }
        progress_bar.inc(1);
    }

    debug!("Finished reading");
    progress_bar.abandon_with_message("Finished reading");
    Ok(())
}

fn compute_thread(
    convolver: &ModelConvolver,
    epsilon: &BTreeMap<usize, f64>,
    pbcor: bool,
    rx: Receiver<PlanePair>,
    tx: Sender<RestoredPlane>,
    error: &AtomicCell<bool>,
    progress_bar: &ProgressBar,
) -> Result<(), RescaleError> {
    for PlanePair {
        index,
        chan,
        model,
        residual,
        pb,
    } in rx.iter()
    {
        let &eps = epsilon
            .get(&chan)
            .ok_or(RescaleError::MissingEpsilon { chan })?;
        let convolved = convolver.convolve_plane(model.view())?;
        let restored = rescale_plane(convolved.view(), eps, residual.view())?;
        let pbcor = match (pbcor, &pb) {
            (true, Some(pb)) => Some(&restored / pb),
            _ => None,
        };
        trace!("Channel {chan}: epsilon {eps:.5}");

        if error.load() {
            return Ok(());
        }
        match tx.send(RestoredPlane {
            index,
            restored,
            pbcor,
            pb,
        }) {
            Ok(()) => (),
            Err(_) => return Ok(()),
        }
        progress_bar.inc(1);
    }

    debug!("Finished convolving");
    progress_bar.abandon_with_message("Finished convolving");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_thread(
    header: &OutputHeader,
    num_planes: usize,
    plane_shape: (usize, usize),
    epsilon: &BTreeMap<usize, f64>,
    dests: Destinations,
    rx: Receiver<RestoredPlane>,
    error: &AtomicCell<bool>,
    progress_bar: &ProgressBar,
) -> Result<Written, FinalizeError> {
    let mut jvm = CubeWriter::create(dests.jvm, num_planes, plane_shape, header)?;
    let mut pbcor = match dests.pbcor {
        Some(dest) => Some(CubeWriter::create(dest, num_planes, plane_shape, header)?),
        None => None,
    };
    // Sums and counts of finite primary beam values.
    let mut pb_sum: Option<(Array2<f64>, Array2<u32>)> = None;

    let mut num_written = 0;
    for RestoredPlane {
        index,
        restored,
        pbcor: pbcor_plane,
        pb,
    } in rx.iter()
    {
        jvm.write_plane(index, restored.view())?;
        if let (Some(writer), Some(plane)) = (pbcor.as_mut(), pbcor_plane) {
            writer.write_plane(index, plane.view())?;
        }
        if let Some(pb) = pb {
            let (sum, count) =
                pb_sum.get_or_insert_with(|| (Array2::zeros(plane_shape), Array2::zeros(plane_shape)));
            azip!((s in sum, c in count, &v in &pb) {
                if v.is_finite() {
                    *s += v as f64;
                    *c += 1;
                }
            });
        }
        num_written += 1;
        progress_bar.inc(1);
    }

    // If another thread failed, its error is more useful than ours.
    if error.load() || num_written != num_planes {
        return Err(RescaleError::PlaneCount {
            expected: num_planes,
            got: num_written,
        }
        .into());
    }

    let flat_pb = pb_sum.map(|(sum, count)| {
        let mut flat = Array2::from_elem(plane_shape, f32::NAN);
        azip!((f in &mut flat, &s in &sum, &c in &count) {
            if c > 0 {
                *f = (s / c as f64) as f32;
            }
        });
        flat
    });

    jvm.add_epsilon_table(epsilon)?;
    if let Some(flat) = &flat_pb {
        jvm.add_image_extension("FLATPB", flat.view())?;
    }
    if let Some(writer) = pbcor.as_mut() {
        writer.add_epsilon_table(epsilon)?;
    }
    let flat_pb = match (dests.flat_pb, &flat_pb) {
        (Some((dest, flat_header)), Some(flat)) => {
            let mut writer = CubeWriter::create(dest, 1, plane_shape, flat_header)?;
            writer.write_plane(0, flat.view())?;
            Some(writer)
        }
        _ => None,
    };

    // Everything is written; move the outputs into place together.
    let jvm_image = jvm.finish()?;
    let pbcor_image = pbcor.map(CubeWriter::finish).transpose()?;
    let flat_pb = flat_pb.map(CubeWriter::finish).transpose()?;

    debug!("Finished writing");
    progress_bar.abandon_with_message("Finished writing");
    Ok(Written {
        jvm_image,
        pbcor_image,
        flat_pb,
    })
}
