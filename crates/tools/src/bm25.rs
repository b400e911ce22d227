//! BM25 ranking over tool metadata.
//!
//! Each document is the concatenation of a tool's name, description, and
//! parameter names. `search` returns the top-k tool names; ties break by
//! kind priority (local > mcp > skill) then lexicographic name, so the
//! ranking is fully deterministic.

use corvid_core::tool::ToolKind;
use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

struct Doc {
    name: String,
    kind: ToolKind,
    tf: HashMap<String, usize>,
    len: usize,
}

/// An immutable BM25 index, rebuilt whenever the registry changes.
pub struct Bm25Index {
    docs: Vec<Doc>,
    df: HashMap<String, usize>,
    avg_len: f64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl Bm25Index {
    /// Build from `(tool_name, kind, document_text)` entries.
    pub fn build(entries: &[(String, ToolKind, String)]) -> Self {
        let mut docs = Vec::with_capacity(entries.len());
        let mut df: HashMap<String, usize> = HashMap::new();

        for (name, kind, text) in entries {
            let tokens = tokenize(text);
            let len = tokens.len();
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            docs.push(Doc {
                name: name.clone(),
                kind: *kind,
                tf,
                len,
            });
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(|d| d.len).sum::<usize>() as f64 / docs.len() as f64
        };

        Self { docs, df, avg_len }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Top-k tool names for the query. Zero-scoring tools are omitted.
    pub fn search(&self, query: &str, k: usize) -> Vec<String> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f64;

        let mut scored: Vec<(f64, &Doc)> = self
            .docs
            .iter()
            .map(|doc| {
                let mut score = 0.0;
                for term in &terms {
                    let Some(&tf) = doc.tf.get(term) else {
                        continue;
                    };
                    let df = *self.df.get(term).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let tf = tf as f64;
                    let norm = tf * (K1 + 1.0)
                        / (tf + K1 * (1.0 - B + B * doc.len as f64 / self.avg_len));
                    score += idf * norm;
                }
                (score, doc)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(da.kind.priority().cmp(&db.kind.priority()))
                .then(da.name.cmp(&db.name))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: ToolKind, text: &str) -> (String, ToolKind, String) {
        (name.into(), kind, text.into())
    }

    fn sample_index() -> Bm25Index {
        Bm25Index::build(&[
            entry(
                "web_search",
                ToolKind::Local,
                "web_search Search the web for pages matching a query query limit",
            ),
            entry(
                "calculator",
                ToolKind::Local,
                "calculator Evaluate an arithmetic expression expression",
            ),
            entry(
                "weather_lookup",
                ToolKind::Mcp,
                "weather_lookup Get the current weather for a location location units",
            ),
        ])
    }

    #[test]
    fn relevant_tool_ranks_first() {
        let index = sample_index();
        let results = index.search("what's the weather in tokyo", 2);
        assert_eq!(results[0], "weather_lookup");
    }

    #[test]
    fn zero_score_tools_omitted() {
        let index = sample_index();
        let results = index.search("weather", 10);
        assert_eq!(results, vec!["weather_lookup"]);
    }

    #[test]
    fn unmatched_query_returns_empty() {
        let index = sample_index();
        assert!(index.search("quantum entanglement", 3).is_empty());
    }

    #[test]
    fn ties_break_by_kind_priority_then_name() {
        let index = Bm25Index::build(&[
            entry("zeta", ToolKind::Mcp, "shared token"),
            entry("alpha", ToolKind::Mcp, "shared token"),
            entry("remote", ToolKind::SkillScript, "shared token"),
        ]);
        let results = index.search("shared", 3);
        // Identical scores: mcp before skill, then lexicographic.
        assert_eq!(results, vec!["alpha", "zeta", "remote"]);
    }

    #[test]
    fn k_caps_results() {
        let index = sample_index();
        let results = index.search("search the web query expression weather", 1);
        assert_eq!(results.len(), 1);
    }
}
