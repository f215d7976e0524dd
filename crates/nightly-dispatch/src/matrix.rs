//! Matrix normalization and override filtering.
//!
//! Parses the manifest's job matrix, fills in platform defaults for each
//! entry, prunes override keys inapplicable to the target platform, and
//! selects the entries matching every override criterion.

use indexmap::IndexMap;
use nightly_core::JobEntry;
use tracing::debug;

const DEFAULT_OS: &str = "linux";
const DEFAULT_LINUX_DIST: &str = "xenial";
const DEFAULT_LINUX_ARCH: &str = "x86_64";
const DEFAULT_OSX_IMAGE: &str = "xcode9.4";

/// Select the manifest's matrix entries matching the override criteria.
///
/// Manifests without a matrix section, and unparseable manifests, yield
/// an empty result; the dispatcher then sends no matrix restriction.
pub fn filter(manifest: &str, criteria: &IndexMap<String, String>) -> Vec<JobEntry> {
    let Some(jobs) = parse_matrix(manifest) else {
        debug!("manifest has no job matrix, nothing to filter");
        return Vec::new();
    };

    let criteria = normalize_overrides(criteria);
    jobs.iter()
        .map(apply_defaults)
        .filter(|job| matches(job, &criteria))
        .collect()
}

/// Drop override keys that cannot apply to the targeted platform, so an
/// irrelevant field never excludes an otherwise-matching job.
pub fn normalize_overrides(criteria: &IndexMap<String, String>) -> IndexMap<String, String> {
    let mut normalized = criteria.clone();
    match criteria.get("os").map(String::as_str) {
        Some("linux") | Some("freebsd") => {
            normalized.shift_remove("osx_image");
        }
        Some("osx") => {
            normalized.shift_remove("dist");
        }
        _ => {}
    }
    normalized
}

/// Fill in platform defaults for absent fields, in fixed order.
pub fn apply_defaults(job: &JobEntry) -> JobEntry {
    let mut job = job.clone();
    job.set_default("os", DEFAULT_OS);
    match job.get("os") {
        Some("linux") => {
            job.set_default("dist", DEFAULT_LINUX_DIST);
            job.set_default("arch", DEFAULT_LINUX_ARCH);
        }
        Some("osx") => {
            job.set_default("osx_image", DEFAULT_OSX_IMAGE);
        }
        _ => {}
    }
    job
}

fn matches(job: &JobEntry, criteria: &IndexMap<String, String>) -> bool {
    criteria
        .iter()
        .all(|(key, value)| job.get(key) == Some(value.as_str()))
}

fn parse_matrix(manifest: &str) -> Option<Vec<JobEntry>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(manifest).ok()?;
    let section = doc.get("matrix").or_else(|| doc.get("jobs"))?;
    let include = section.get("include")?.as_sequence()?;
    Some(
        include
            .iter()
            .filter_map(|entry| serde_yaml::from_value(entry.clone()).ok())
            .collect(),
    )
}
