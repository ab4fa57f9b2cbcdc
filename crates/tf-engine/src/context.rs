//! Repository context selection
//!
//! Picks a bounded subset of a repository's files for the prompts: noise
//! (vendored code, build output, lockfiles, binaries) is dropped, the rest
//! is ranked by keyword overlap with the ticket and by file kind, then
//! capped by count and by total bytes.

use crate::capability::RepositoryContext;
use crate::config::EngineConfig;
use crate::error::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tf_model::{ContextBundle, ContextFile, TicketBrief};

const IGNORED_DIRS: &[&str] = &[
    ".git", ".next", ".venv", "__pycache__", "build", "coverage", "dist", "node_modules", "target",
    "vendor",
];

const LOCKFILES: &[&str] = &[
    "Cargo.lock", "Gemfile.lock", "composer.lock", "go.sum", "package-lock.json", "pnpm-lock.yaml",
    "poetry.lock", "yarn.lock",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "bin", "dll", "dylib", "eot", "exe", "gif", "gz", "ico", "jar", "jpeg", "jpg", "mp3", "mp4",
    "pdf", "png", "so", "tar", "ttf", "webp", "woff", "woff2", "zip",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cpp", "cs", "go", "h", "java", "js", "jsx", "kt", "php", "py", "rb", "rs", "scala",
    "swift", "ts", "tsx", "vue",
];

const SUPPORTING_EXTENSIONS: &[&str] = &[
    "graphql", "json", "md", "proto", "sql", "toml", "yaml", "yml",
];

const STOPWORDS: &[&str] = &[
    "add", "and", "are", "can", "for", "from", "into", "new", "not", "should", "that", "the",
    "this", "when", "with", "user", "users",
];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").expect("word pattern is valid"));

/// Bounded file selection for the context step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSelector {
    pub max_files: usize,
    pub max_bytes: usize,
}

impl ContextSelector {
    #[inline]
    #[must_use]
    pub fn new(max_files: usize, max_bytes: usize) -> Self {
        Self {
            max_files,
            max_bytes,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_context_files, config.max_context_bytes)
    }

    /// Whether a path is worth reading at all
    #[must_use]
    pub fn is_candidate(path: &str) -> bool {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut file_name = "";
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                file_name = segment;
            } else if IGNORED_DIRS.contains(&segment) {
                return false;
            }
        }
        if file_name.is_empty() || LOCKFILES.contains(&file_name) {
            return false;
        }
        !extension(file_name).is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Filter and rank `tree`, best first, capped at `max_files`
    #[must_use]
    pub fn rank(&self, tree: &[String], ticket: &TicketBrief) -> Vec<String> {
        let keywords = keywords(&format!("{} {}", ticket.title, ticket.intent));
        let mut scored: Vec<(u32, &String)> = tree
            .iter()
            .filter(|p| Self::is_candidate(p))
            .map(|p| (relevance(p, &keywords), p))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(self.max_files)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Gather the context bundle for a ticket
    ///
    /// Tickets without a repository get an empty bundle.
    pub async fn gather(
        &self,
        repository: &dyn RepositoryContext,
        ticket: &TicketBrief,
    ) -> Result<ContextBundle, EngineError> {
        let Some(location) = &ticket.repository else {
            return Ok(ContextBundle::default());
        };

        let tree = repository.file_tree(location).await?;
        let selected = self.rank(&tree, ticket);
        tracing::debug!(
            ticket_id = %ticket.id,
            tree = tree.len(),
            selected = selected.len(),
            "context files ranked"
        );
        if selected.is_empty() {
            return Ok(ContextBundle {
                tree_size: tree.len(),
                ..ContextBundle::default()
            });
        }

        let mut contents = repository.read_files(location, &selected).await?;
        let mut bundle = ContextBundle {
            tree_size: tree.len(),
            ..ContextBundle::default()
        };
        let mut total = 0usize;
        for path in selected {
            let Some(content) = contents.remove(&path) else {
                continue;
            };
            if total + content.len() > self.max_bytes {
                bundle.truncated += 1;
                continue;
            }
            total += content.len();
            bundle.files.push(ContextFile { path, content });
        }
        Ok(bundle)
    }
}

fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn keywords(text: &str) -> BTreeSet<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn relevance(path: &str, keywords: &BTreeSet<String>) -> u32 {
    let lower = path.to_lowercase();
    let overlap = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
    let kind = match path.rsplit('/').next().and_then(extension) {
        Some(ext) if SOURCE_EXTENSIONS.contains(&ext.as_str()) => 3,
        Some(ext) if SUPPORTING_EXTENSIONS.contains(&ext.as_str()) => 1,
        _ => 0,
    };
    u32::try_from(overlap).unwrap_or(u32::MAX / 10).saturating_mul(10) + kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MockRepositoryContext, ProviderError};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tf_model::RepositoryRef;

    fn ticket() -> TicketBrief {
        TicketBrief::new("T-1", "CSV export", "Add export button to the report page")
            .with_repository(RepositoryRef::new("acme", "web", "main"))
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn filters_noise() {
        assert!(ContextSelector::is_candidate("src/report/export.ts"));
        assert!(!ContextSelector::is_candidate("node_modules/lodash/index.js"));
        assert!(!ContextSelector::is_candidate("crates/core/target/debug/build.rs"));
        assert!(!ContextSelector::is_candidate("Cargo.lock"));
        assert!(!ContextSelector::is_candidate("assets/logo.PNG"));
        assert!(ContextSelector::is_candidate("Makefile"));
        assert!(!ContextSelector::is_candidate(""));
    }

    #[test]
    fn ranks_by_overlap_then_kind() {
        let tree = paths(&[
            "README.md",
            "src/util/strings.ts",
            "src/report/ReportPage.tsx",
            "src/report/csv_export.ts",
            "docs/export.md",
        ]);
        let ranked = ContextSelector::new(10, usize::MAX).rank(&tree, &ticket());
        assert_eq!(
            ranked,
            paths(&[
                "src/report/csv_export.ts",
                "src/report/ReportPage.tsx",
                "docs/export.md",
                "src/util/strings.ts",
                "README.md",
            ])
        );
    }

    #[test]
    fn caps_file_count() {
        let tree: Vec<String> = (0..500).map(|i| format!("src/mod{i:03}.rs")).collect();
        let ranked = ContextSelector::new(100, usize::MAX).rank(&tree, &ticket());
        assert_eq!(ranked.len(), 100);
        assert_eq!(ranked[0], "src/mod000.rs");
    }

    proptest! {
        #[test]
        fn rank_keeps_only_candidates_within_cap(
            tree in proptest::collection::vec("[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.(rs|ts|png|md)", 0..60),
            max_files in 0usize..20,
        ) {
            let ranked = ContextSelector::new(max_files, usize::MAX).rank(&tree, &ticket());
            prop_assert!(ranked.len() <= max_files);
            for path in &ranked {
                prop_assert!(ContextSelector::is_candidate(path));
                prop_assert!(tree.contains(path));
            }
        }
    }

    #[tokio::test]
    async fn gather_applies_byte_cap() {
        let mut repo = MockRepositoryContext::new();
        repo.expect_file_tree()
            .times(1)
            .returning(|_| Ok(paths(&["src/report/export.ts", "src/report/view.ts", "src/a.ts"])));
        repo.expect_read_files().times(1).returning(|_, requested| {
            Ok(requested
                .iter()
                .map(|p| {
                    let size = match p.as_str() {
                        "src/report/export.ts" => 60,
                        "src/report/view.ts" => 50,
                        _ => 30,
                    };
                    (p.clone(), "x".repeat(size))
                })
                .collect::<BTreeMap<_, _>>())
        });

        let bundle = ContextSelector::new(10, 100)
            .gather(&repo, &ticket())
            .await
            .unwrap();
        assert_eq!(bundle.tree_size, 3);
        assert_eq!(bundle.paths(), vec!["src/report/export.ts", "src/a.ts"]);
        assert_eq!(bundle.truncated, 1);
        assert!(bundle.total_bytes() <= 100);
    }

    #[tokio::test]
    async fn ticket_without_repository_skips_capability() {
        let repo = MockRepositoryContext::new();
        let brief = TicketBrief::new("T-2", "Docs", "Fix typo");
        let bundle = ContextSelector::new(10, 100).gather(&repo, &brief).await.unwrap();
        assert_eq!(bundle, ContextBundle::default());
    }

    #[tokio::test]
    async fn tree_failure_is_provider_error() {
        let mut repo = MockRepositoryContext::new();
        repo.expect_file_tree()
            .returning(|_| Err(ProviderError::new("github: 502 bad gateway")));
        let err = ContextSelector::new(10, 100)
            .gather(&repo, &ticket())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "github: 502 bad gateway");
    }
}
