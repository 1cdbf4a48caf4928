//! Container image reference construction.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ControllerError;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("OCI tag pattern is valid")
});

const DIGEST_PREFIX: &str = "sha256:";

pub fn is_digest(version: &str) -> bool {
    version.starts_with(DIGEST_PREFIX)
}

fn base_path(repository: &str, image: &str) -> Result<String, ControllerError> {
    if image.is_empty() {
        return Err(ControllerError::InvalidImage("image name must be set".to_string()));
    }
    let repository = repository.trim_end_matches('/');
    Ok(if repository.is_empty() {
        image.to_string()
    } else {
        format!("{repository}/{image}")
    })
}

/// Build `<repository>/<image>:<tag>` or `<repository>/<image>@<digest>`.
///
/// `suffixes` are appended to the version with `-` (OS tag, kernel); they
/// are not used for digests. An image that already carries a tag or digest
/// is taken as is when no version is given.
pub fn image_path(
    repository: &str,
    image: &str,
    version: &str,
    suffixes: &[&str],
) -> Result<String, ControllerError> {
    let base = base_path(repository, image)?;

    if version.is_empty() {
        let last_segment = base.rsplit('/').next().unwrap_or_default();
        if last_segment.contains(':') || base.contains('@') {
            return Ok(base);
        }
        return Err(ControllerError::InvalidImage(format!(
            "version must be set for image {base}"
        )));
    }

    if is_digest(version) {
        return Ok(format!("{base}@{version}"));
    }

    let mut tag = version.to_string();
    for suffix in suffixes.iter().filter(|s| !s.is_empty()) {
        tag.push('-');
        tag.push_str(suffix);
    }
    if !TAG_PATTERN.is_match(&tag) {
        return Err(ControllerError::InvalidImage(format!(
            "tag '{tag}' for image {base} is not a valid OCI tag"
        )));
    }
    Ok(format!("{base}:{tag}"))
}
