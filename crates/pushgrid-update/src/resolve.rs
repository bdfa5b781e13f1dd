//! Resolving an update check against a release history.

use pushgrid_state::Release;
use semver::Version;
use tracing::trace;

use crate::decision::{RolloutCandidate, UpdateDecision, UpdatePackage, UpdateResolution};
use crate::request::ValidatedRequest;

fn is_match(release: &Release, request: &ValidatedRequest) -> bool {
    !release.is_disabled
        && (request.is_companion || release.app_version.matches(&request.client.version))
}

/// Resolve `request` against `history` (oldest first).
///
/// The newest matching enabled release is the head match. When it is a
/// partial rollout, clients outside it are served the nearest older match
/// instead.
pub fn resolve(history: &[Release], request: &ValidatedRequest) -> UpdateResolution {
    let Some(head) = history.iter().rposition(|r| is_match(r, request)) else {
        let decision = binary_signal(history, request);
        trace!(?decision, "no release matches client binary");
        return UpdateResolution::fixed(echo_client_version(decision, request));
    };

    let head_release = &history[head];
    let fallback = if head_release.has_active_rollout() {
        history[..head]
            .iter()
            .rposition(|r| is_match(r, request) && !r.has_active_rollout())
    } else {
        None
    };

    let resolution = match fallback {
        Some(original) => UpdateResolution {
            original: decide(history, original, request),
            rollout: Some(RolloutCandidate {
                percent: head_release.rollout.unwrap_or(100),
                release_tag: head_release.release_tag().to_string(),
                decision: decide(history, head, request),
            }),
        },
        None => UpdateResolution::fixed(decide(history, head, request)),
    };

    UpdateResolution {
        original: echo_client_version(resolution.original, request),
        rollout: resolution.rollout.map(|candidate| RolloutCandidate {
            decision: echo_client_version(candidate.decision, request),
            ..candidate
        }),
    }
}

/// Decision for a client whose binary no release targets.
///
/// Any enabled release aimed at a newer binary, newest first, asks for a
/// binary upgrade. Otherwise the client keeps running its own binary.
fn binary_signal(history: &[Release], request: &ValidatedRequest) -> UpdateDecision {
    let version = &request.client.version;
    match history
        .iter()
        .rev()
        .find(|r| !r.is_disabled && r.app_version.targets_newer_than(version))
    {
        Some(target) => UpdateDecision::NeedsBinaryUpgrade {
            app_version: target.app_version.to_string(),
        },
        None => UpdateDecision::RunBinaryVersion {
            app_version: version.to_string(),
        },
    }
}

/// Decision for a client served `history[selected]`.
fn decide(history: &[Release], selected: usize, request: &ValidatedRequest) -> UpdateDecision {
    let release = &history[selected];
    let client_hash = request.package_hash.as_deref();

    if client_hash != Some(release.package_hash.as_str()) {
        let blob = client_hash
            .and_then(|hash| release.diffs.get(hash))
            .unwrap_or(&release.blob_ref);
        return UpdateDecision::Available(UpdatePackage {
            download_url: blob.url.clone(),
            package_size: blob.size,
            package_hash: release.package_hash.clone(),
            label: release.label.clone(),
            is_mandatory: release.is_mandatory,
            description: release.description.clone(),
            app_version: request.client.version.to_string(),
        });
    }

    if !request.is_companion
        && let Some(target) = binary_upgrade_target(&history[selected + 1..], &request.client.version)
    {
        return UpdateDecision::NeedsBinaryUpgrade {
            app_version: target.app_version.to_string(),
        };
    }

    UpdateDecision::UpToDate {
        app_version: request.client.version.to_string(),
    }
}

/// The nearest later enabled release aimed at a newer binary than `version`.
fn binary_upgrade_target<'a>(later: &'a [Release], version: &Version) -> Option<&'a Release> {
    later
        .iter()
        .find(|r| !r.is_disabled && r.app_version.targets_newer_than(version))
}

/// Give the client back its version string as it sent it when that string
/// had to be normalized.
fn echo_client_version(mut decision: UpdateDecision, request: &ValidatedRequest) -> UpdateDecision {
    let client = &request.client;
    if client.was_normalized && decision.app_version() == client.version.to_string() {
        *decision.app_version_mut() = client.original.clone();
    }
    decision
}
