//! Seeded generation of new test cases from existing models.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ModelError;
use crate::model::UpdateSynthesisModel;
use crate::types::Switch;

/// Adds `n` distinct new waypoints, picked among switches that forward in both
/// routings and are not waypoints yet.
///
/// Returns `None` when there are fewer than `n` candidates.
pub fn add_random_waypoints<R: Rng + ?Sized>(
    usm: &UpdateSynthesisModel,
    rng: &mut R,
    n: usize,
) -> Option<UpdateSynthesisModel> {
    let final_sources: Vec<Switch> = usm.final_routing().iter().map(|&(s, _)| s).collect();
    let mut candidates: Vec<Switch> = usm
        .initial_routing()
        .iter()
        .map(|&(s, _)| s)
        .filter(|s| final_sources.contains(s) && !usm.waypoints().contains(s))
        .collect();
    candidates.sort();
    candidates.dedup();

    let mut picked = Vec::with_capacity(n);
    for _ in 0..n {
        if candidates.is_empty() {
            return None;
        }
        picked.push(candidates.remove(rng.gen_range(0..candidates.len())));
    }
    Some(usm.with_waypoints(picked))
}

fn two_distinct<R: Rng + ?Sized>(usm: &UpdateSynthesisModel, rng: &mut R) -> Option<(Switch, Switch)> {
    let mut candidates: Vec<Switch> = usm.switches().into_iter().collect();
    if candidates.len() < 2 {
        return None;
    }
    let a = candidates.remove(rng.gen_range(0..candidates.len()));
    let b = candidates[rng.gen_range(0..candidates.len())];
    Some((a, b))
}

/// Adds a conditional enforcement between two distinct random switches.
pub fn random_conditional_enforcement<R: Rng + ?Sized>(
    usm: &UpdateSynthesisModel,
    rng: &mut R,
) -> Option<UpdateSynthesisModel> {
    let (s, s_prime) = two_distinct(usm, rng)?;
    Some(usm.with_conditional_enforcement(s, s_prime))
}

/// Adds an alternative waypoint pair of two distinct random switches.
pub fn random_alternative_waypoint<R: Rng + ?Sized>(
    usm: &UpdateSynthesisModel,
    rng: &mut R,
) -> Option<UpdateSynthesisModel> {
    let (s1, s2) = two_distinct(usm, rng)?;
    Some(usm.with_alternative_waypoint(s1, s2))
}

/// Files produced by [`generate_directory`].
#[derive(Debug, Default)]
pub struct Generated {
    pub written: Vec<PathBuf>,
    /// Inputs the transform declined.
    pub skipped: Vec<PathBuf>,
}

/// Applies `transform` to every model file directly inside `src` and writes the
/// results under the same names to the directory `<src><suffix>`.
///
/// Files are processed in name order with one generator seeded by `seed`, so a run
/// is reproducible.
pub fn generate_directory<F>(src: &Path, suffix: &str, seed: u64, mut transform: F) -> Result<Generated, ModelError>
where
    F: FnMut(&UpdateSynthesisModel, &mut StdRng) -> Option<UpdateSynthesisModel>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let mut target = src.as_os_str().to_owned();
    target.push(suffix);
    let target = PathBuf::from(target);
    fs::create_dir_all(&target)?;

    let mut files: Vec<PathBuf> = fs::read_dir(src)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    files.retain(|p| p.is_file());
    files.sort();

    let mut generated = Generated::default();
    for path in files {
        let Some(name) = path.file_name() else { continue };
        let usm = UpdateSynthesisModel::from_path(&path)?;
        match transform(&usm, &mut rng) {
            Some(new) => {
                let out = target.join(name);
                fs::write(&out, new.to_json_string()?)?;
                info!("Transformed {}", path.display());
                generated.written.push(out);
            }
            None => {
                warn!("Could not transform {}", path.display());
                generated.skipped.push(path);
            }
        }
    }
    Ok(generated)
}
