use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::allocator::IndexAllocator;
use crate::model::{FileEntry, FileKind, FileRole, NumberedSet, RenameEntry, RenamePlan};
use crate::naming::{random_token, Classifier, SIDECAR_EXTENSION};
use crate::pairing::{is_numbered_sidecar, pair_sidecars};

/// Everything decided about one directory before any file is touched.
///
/// `orphans` lists unmatched sidecars that are not already organized
/// (`<n>_prompt.txt` and friends). Neither kind is ever planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPlan {
    pub numbered: NumberedSet,
    pub plans: Vec<RenamePlan>,
    pub orphans: Vec<FileEntry>,
    pub ignored: Vec<FileEntry>,
}

pub fn plan_directory<R: Rng + ?Sized>(
    directory: &Path,
    files: &[PathBuf],
    classifier: &Classifier,
    rng: &mut R,
) -> DirectoryPlan {
    let mut numbered = NumberedSet::new();
    let mut candidates = Vec::new();
    let mut sidecars = Vec::new();
    let mut ignored = Vec::new();

    for path in files {
        let entry = classifier.classify(path);
        match entry.kind {
            FileKind::Numbered(index) => {
                numbered.insert(index);
            }
            FileKind::Candidate => candidates.push(entry),
            FileKind::Sidecar => sidecars.push(entry),
            FileKind::Ignored => ignored.push(entry),
        }
    }

    candidates.sort_by(|a, b| {
        a.file_name
            .to_lowercase()
            .cmp(&b.file_name.to_lowercase())
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    let pairing = pair_sidecars(&candidates, &sidecars);
    let mut allocator = IndexAllocator::seed(numbered.iter().copied());
    // Existing names are taken even when nothing plans to move onto them, so
    // a leftover `<n>_prompt.txt` pushes new sidecars to `_dup<k>`.
    let mut planned_names: HashSet<String> = files
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().to_lowercase())
        .collect();
    let template = classifier.template();

    let plans = pairing
        .groups
        .into_iter()
        .map(|group| {
            let index = allocator.next_free();
            let token = if template.uses_random() {
                random_token(&mut *rng)
            } else {
                String::new()
            };
            let image_name = format!("{}.{}", template.render(index, &token), group.image.extension);
            planned_names.insert(image_name.to_lowercase());

            let mut entries = vec![RenameEntry {
                source: group.image.path.clone(),
                destination: directory.join(image_name),
                role: FileRole::Image,
            }];
            for sidecar in group.sidecars {
                let Some(name) = sidecar.role.sidecar_file_name(index) else {
                    continue;
                };
                let name = unique_sidecar_name(name, &sidecar.entry.file_name, &mut planned_names);
                entries.push(RenameEntry {
                    source: sidecar.entry.path,
                    destination: directory.join(name),
                    role: sidecar.role,
                });
            }

            RenamePlan {
                group_stem: group.stem,
                index,
                entries,
            }
        })
        .collect();

    DirectoryPlan {
        numbered,
        plans,
        orphans: pairing
            .orphans
            .into_iter()
            .filter(|entry| !is_numbered_sidecar(&entry.stem))
            .collect(),
        ignored,
    }
}

/// Keeps destinations unique (case-insensitively) against existing files and
/// earlier plans by inserting `_dup<k>` before the extension. A sidecar that
/// already carries its target name keeps it.
fn unique_sidecar_name(name: String, own_name: &str, planned: &mut HashSet<String>) -> String {
    if name.eq_ignore_ascii_case(own_name) || planned.insert(name.to_lowercase()) {
        planned.insert(name.to_lowercase());
        return name;
    }
    let stem = name
        .strip_suffix(&format!(".{SIDECAR_EXTENSION}"))
        .unwrap_or(&name)
        .to_string();
    let mut k = 2;
    loop {
        let candidate = format!("{stem}_dup{k}.{SIDECAR_EXTENSION}");
        if planned.insert(candidate.to_lowercase()) {
            return candidate;
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::plan_directory;
    use crate::model::FileRole;
    use crate::naming::{Classifier, NamingTemplate};

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|name| Path::new("/data").join(name)).collect()
    }

    fn destination_names(plan: &super::DirectoryPlan) -> Vec<Vec<String>> {
        plan.plans
            .iter()
            .map(|group| {
                group
                    .entries
                    .iter()
                    .map(|entry| {
                        entry
                            .destination
                            .file_name()
                            .map(|name| name.to_string_lossy().to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn fills_gap_for_new_candidate() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&["1.png", "2.png", "4.png", "deadbeef.png"]),
            &classifier,
            &mut rng,
        );

        assert_eq!(plan.plans.len(), 1);
        assert_eq!(plan.plans[0].index, 3);
        assert_eq!(destination_names(&plan), vec![vec!["3.png".to_string()]]);
    }

    #[test]
    fn plans_image_with_all_sidecars() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&[
                "1.png",
                "2.png",
                "3.png",
                "4.png",
                "abc123.png",
                "abc123.txt",
                "abc123_negative.txt",
                "abc123_style.txt",
            ]),
            &classifier,
            &mut rng,
        );

        assert_eq!(plan.plans[0].index, 5);
        assert_eq!(
            destination_names(&plan),
            vec![vec![
                "5.png".to_string(),
                "5_prompt.txt".to_string(),
                "5_negative_prompt.txt".to_string(),
                "5_style_prompt.txt".to_string(),
            ]]
        );
        assert_eq!(plan.plans[0].entries[0].role, FileRole::Image);
    }

    #[test]
    fn allocation_follows_case_insensitive_name_order() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&["zeta.png", "Beta.JPG", "alpha.webp"]),
            &classifier,
            &mut rng,
        );

        assert_eq!(
            destination_names(&plan),
            vec![
                vec!["1.webp".to_string()],
                vec!["2.jpg".to_string()],
                vec!["3.png".to_string()],
            ]
        );
    }

    #[test]
    fn duplicate_sidecar_destinations_are_disambiguated() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&["abc.png", "abc.txt", "abc_prompt.txt"]),
            &classifier,
            &mut rng,
        );

        assert_eq!(
            destination_names(&plan),
            vec![vec![
                "1.png".to_string(),
                "1_prompt.txt".to_string(),
                "1_prompt_dup2.txt".to_string(),
            ]]
        );
    }

    #[test]
    fn leftover_sidecar_names_are_not_reused() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&["1.png", "2_PROMPT.txt", "new.png", "new.txt"]),
            &classifier,
            &mut rng,
        );

        assert_eq!(
            destination_names(&plan),
            vec![vec!["2.png".to_string(), "2_prompt_dup2.txt".to_string()]]
        );
    }

    #[test]
    fn seeded_random_plans_are_repeatable() {
        let template = NamingTemplate::parse(NamingTemplate::INDEX_RANDOM).expect("valid");
        let classifier = Classifier::with_defaults(template);
        let names = files(&["b.png", "a.png", "3_0123abcd.png"]);

        let first = plan_directory(
            Path::new("/data"),
            &names,
            &classifier,
            &mut StdRng::seed_from_u64(42),
        );
        let second = plan_directory(
            Path::new("/data"),
            &names,
            &classifier,
            &mut StdRng::seed_from_u64(42),
        );

        assert_eq!(first, second);
        assert_eq!(first.numbered.iter().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(
            first.plans.iter().map(|plan| plan.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn orphans_and_ignored_files_are_not_planned() {
        let classifier = Classifier::with_defaults(NamingTemplate::index());
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_directory(
            Path::new("/data"),
            &files(&["1.png", "1_prompt.txt", "lonely.txt", "notes.md"]),
            &classifier,
            &mut rng,
        );

        assert!(plan.plans.is_empty());
        assert_eq!(plan.orphans.len(), 1);
        assert_eq!(plan.orphans[0].file_name, "lonely.txt");
        assert_eq!(plan.ignored.len(), 1);
    }
}
