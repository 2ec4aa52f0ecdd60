use std::collections::HashMap;

use crate::model::{FileEntry, FileRole, HashGroup, PairedSidecar};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    pub groups: Vec<HashGroup>,
    pub orphans: Vec<FileEntry>,
}

/// Attaches sidecars to candidate images sharing their stem.
///
/// `candidates` must already be in allocation order: when two images share a
/// stem (`abc.png`, `abc.jpg`) the sidecars go to the first one. A sidecar
/// matching several stems (`abc` and `abc_v2`) goes to the longest.
pub fn pair_sidecars(candidates: &[FileEntry], sidecars: &[FileEntry]) -> Pairing {
    let mut owner_by_stem: HashMap<&str, usize> = HashMap::new();
    for (position, candidate) in candidates.iter().enumerate() {
        owner_by_stem.entry(candidate.stem.as_str()).or_insert(position);
    }

    let mut attached: Vec<Vec<PairedSidecar>> = vec![Vec::new(); candidates.len()];
    let mut orphans = Vec::new();

    for sidecar in sidecars {
        let matched = owner_by_stem
            .iter()
            .filter(|(stem, _)| stem_matches(stem, &sidecar.stem))
            .max_by_key(|(stem, _)| stem.len());
        match matched {
            Some((stem, position)) => attached[*position].push(PairedSidecar {
                role: role_for(stem, &sidecar.stem),
                entry: sidecar.clone(),
            }),
            None => orphans.push(sidecar.clone()),
        }
    }

    let groups = candidates
        .iter()
        .zip(attached)
        .map(|(image, mut sidecars)| {
            sidecars.sort_by(|a, b| a.entry.file_name.cmp(&b.entry.file_name));
            HashGroup {
                stem: image.stem.clone(),
                image: image.clone(),
                sidecars,
            }
        })
        .collect();

    orphans.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Pairing { groups, orphans }
}

fn stem_matches(image_stem: &str, sidecar_stem: &str) -> bool {
    match sidecar_stem.strip_prefix(image_stem) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

/// Role of a sidecar from what follows the image stem. A trailing `_prompt`
/// is dropped first so already-suffixed files do not gain a second one.
pub fn role_for(image_stem: &str, sidecar_stem: &str) -> FileRole {
    let remainder = sidecar_stem.strip_prefix(image_stem).unwrap_or(sidecar_stem);
    let remainder = strip_suffix_ignore_ascii_case(remainder, "_prompt").unwrap_or(remainder);

    if remainder.eq_ignore_ascii_case("_negative") {
        return FileRole::NegativePrompt;
    }
    match remainder.strip_prefix('_') {
        Some(suffix) if !suffix.is_empty() => FileRole::SuffixPrompt(suffix.to_string()),
        _ => FileRole::Prompt,
    }
}

/// Whether a sidecar stem already has the organized shape `<n>_prompt`,
/// `<n>_negative_prompt` or `<n>_<suffix>_prompt`, optionally followed by
/// `_dup<k>`.
pub fn is_numbered_sidecar(stem: &str) -> bool {
    let Some((digits, rest)) = stem.split_once('_') else {
        return false;
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let rest = match rest.rsplit_once("_dup") {
        Some((head, k)) if !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => rest,
    };
    rest == "prompt" || rest.ends_with("_prompt")
}

fn strip_suffix_ignore_ascii_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    let split = value.len().checked_sub(suffix.len())?;
    if !value.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = value.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}
