//! Group/version path matching.
//!
//! # Responsibilities
//! - Extract the group/version from `/apis/<group>/<version>[/...]`
//! - Leave everything else (`/api`, `/apis`, `/apis/<group>`, `/healthz`)
//!   to the local delegate
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - No regex, a single split of the path

use crate::apiservice::GroupVersion;

const APIS_PREFIX: &str = "/apis/";

/// The group/version a request path addresses, if any.
pub fn match_group_version(path: &str) -> Option<GroupVersion> {
    let rest = path.strip_prefix(APIS_PREFIX)?;
    let mut segments = rest.splitn(3, '/');
    let group = segments.next().filter(|s| !s.is_empty())?;
    let version = segments.next().filter(|s| !s.is_empty())?;
    Some(GroupVersion::new(group, version))
}
