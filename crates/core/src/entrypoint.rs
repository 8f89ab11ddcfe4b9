//! Entrypoint inference over a set of uploaded paths.
//!
//! Every path is expanded into alias candidates:
//! - `dir/index.html` also answers to `dir` (score 2)
//! - `dir/page.html` also answers to `dir/page` (score 1)
//! - the path itself is always an alias, unscored
//!
//! A root `index.html` stands for the artifact root, which has no alias of
//! its own, so it keeps its path as the alias and carries the score.
//!
//! Candidates are deduplicated by alias, keeping the highest score and then
//! the shortest original path. The best scored candidate is the default
//! entrypoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aliases that resolve to one original path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAliases {
    pub original: String,
    pub aliases: Vec<String>,
}

/// Output of [`resolve_entrypoints`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointResolution {
    /// Alias expansion table, one entry per input path in input order.
    pub aliases: Vec<PathAliases>,
    /// Chosen entrypoints.
    pub entrypoints: Vec<String>,
    /// Every alias in the table, deduplicated.
    pub flat_aliases: Vec<String>,
}

impl EntrypointResolution {
    /// Original path an alias resolves to.
    pub fn original_for(&self, alias: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|p| p.aliases.iter().any(|a| a == alias))
            .map(|p| p.original.as_str())
    }

    /// Aliases recorded for an original path.
    pub fn aliases_for(&self, original: &str) -> &[String] {
        self.aliases
            .iter()
            .find(|p| p.original == original)
            .map(|p| p.aliases.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug)]
struct Candidate<'a> {
    original: &'a str,
    alias: String,
    score: Option<u8>,
}

impl Candidate<'_> {
    /// Whether `self` should replace `other` for the same alias.
    fn beats(&self, other: &Candidate<'_>) -> bool {
        match self.score.cmp(&other.score) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.original.len() < other.original.len(),
        }
    }
}

fn split_dir(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn candidates_for(path: &str) -> Vec<Candidate<'_>> {
    let (dir, base) = split_dir(path);
    let root_index = base == "index.html" && dir.is_empty();
    let mut out = vec![Candidate {
        original: path,
        alias: path.to_string(),
        score: root_index.then_some(2),
    }];

    if base == "index.html" {
        if !root_index {
            out.push(Candidate {
                original: path,
                alias: dir.to_string(),
                score: Some(2),
            });
        }
    } else if let Some(stem) = base.strip_suffix(".html")
        && !stem.is_empty()
    {
        let alias = if dir.is_empty() {
            stem.to_string()
        } else {
            format!("{dir}/{stem}")
        };
        out.push(Candidate {
            original: path,
            alias,
            score: Some(1),
        });
    }
    out
}

/// Compute aliases and entrypoints for `pathnames`.
///
/// When `requested` is non-empty, entrypoints are the requested values that
/// exist as aliases. If none exist the best scored candidate is used, or the
/// first path if nothing scored.
pub fn resolve_entrypoints(pathnames: &[String], requested: &[String]) -> EntrypointResolution {
    if pathnames.is_empty() {
        return EntrypointResolution::default();
    }

    // alias -> winning candidate, plus first-seen order of aliases
    let mut winners: HashMap<String, Candidate<'_>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for path in pathnames {
        for candidate in candidates_for(path) {
            match winners.get(&candidate.alias) {
                Some(existing) if !candidate.beats(existing) => {}
                Some(_) => {
                    winners.insert(candidate.alias.clone(), candidate);
                }
                None => {
                    order.push(candidate.alias.clone());
                    winners.insert(candidate.alias.clone(), candidate);
                }
            }
        }
    }

    let mut aliases: Vec<PathAliases> = Vec::new();
    for path in pathnames {
        if aliases.iter().any(|p| &p.original == path) {
            continue;
        }
        aliases.push(PathAliases {
            original: path.clone(),
            aliases: Vec::new(),
        });
    }
    for alias in &order {
        if let Some(winner) = winners.get(alias)
            && let Some(entry) = aliases.iter_mut().find(|p| p.original == winner.original)
        {
            entry.aliases.push(alias.clone());
        }
    }

    let flat_aliases = order;

    let matched: Vec<String> = requested
        .iter()
        .filter(|r| flat_aliases.contains(r))
        .fold(Vec::new(), |mut acc, r| {
            if !acc.contains(r) {
                acc.push(r.clone());
            }
            acc
        });

    let entrypoints = if !matched.is_empty() {
        matched
    } else {
        let best = winners
            .values()
            .filter(|c| c.score.is_some())
            .min_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then(a.original.len().cmp(&b.original.len()))
                    .then(a.alias.cmp(&b.alias))
            })
            .map(|c| c.alias.clone());
        vec![best.unwrap_or_else(|| pathnames[0].clone())]
    };

    EntrypointResolution {
        aliases,
        entrypoints,
        flat_aliases,
    }
}
