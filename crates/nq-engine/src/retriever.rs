//! Context retriever: similarity search plus greedy, budget-bounded
//! admission.
//!
//! Candidates are ranked by score (ties: tables first, then qualified name)
//! and admitted in order. A column pulls in its table first; the pair is
//! admitted together or not at all. Admission stops at the first candidate
//! that does not fit, so lower-ranked elements never displace higher ones.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use nq_core::{RetrievalContext, SchemaElement};
use nq_embeddings::{Embedder, SearchHit, VectorIndex};
use tracing::{debug, instrument, warn};

use crate::errors::RetrievalError;
use crate::render::element_cost;

/// One ranked element.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Element as indexed.
    pub element: SchemaElement,
    /// Similarity to the question.
    pub score: f32,
}

/// Ranking order: score descending, tables before columns, then key.
pub fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.element.is_column().cmp(&b.element.is_column()))
        .then_with(|| a.element.key().cmp(&b.element.key()))
}

/// Greedily admit ranked candidates into a context of `budget` tokens.
///
/// `parents` supplies tables of column candidates whose table was not itself
/// a candidate. Columns whose table is unavailable are skipped.
pub fn assemble(
    mut candidates: Vec<Candidate>,
    parents: &HashMap<String, SchemaElement>,
    budget: usize,
) -> Result<RetrievalContext, RetrievalError> {
    candidates.sort_by(rank);
    let hits: HashMap<String, &Candidate> = candidates
        .iter()
        .filter(|c| c.element.is_table())
        .map(|c| (c.element.key(), c))
        .collect();

    let mut ctx = RetrievalContext::new(budget);
    for candidate in &candidates {
        let element = &candidate.element;
        if ctx.contains(&element.qualified_name) {
            continue;
        }
        let cost = element_cost(element);

        if element.is_table() {
            if !ctx.fits(cost) {
                break;
            }
            let _ = ctx.admit_table(element.clone(), candidate.score, cost)?;
            continue;
        }

        let Some(parent_key) = element.parent_key() else {
            continue;
        };
        if ctx.has_table(&parent_key) {
            if !ctx.fits(cost) {
                break;
            }
            let _ = ctx.admit_column(element.clone(), candidate.score, cost)?;
            continue;
        }

        let (parent, parent_score) = match hits.get(&parent_key) {
            Some(hit) => (&hit.element, hit.score),
            None => match parents.get(&parent_key) {
                Some(p) => (p, candidate.score),
                None => {
                    debug!(column = %element.qualified_name, "parent table not indexed, skipping column");
                    continue;
                }
            },
        };
        let parent_cost = element_cost(parent);
        if !ctx.fits(parent_cost + cost) {
            break;
        }
        let _ = ctx.admit_table(parent.clone(), parent_score, parent_cost)?;
        let _ = ctx.admit_column(element.clone(), candidate.score, cost)?;
    }
    Ok(ctx)
}

/// Retrieves token-bounded schema context for questions.
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    candidate_limit: usize,
}

impl ContextRetriever {
    /// Create a retriever searching up to `candidate_limit` entries.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, candidate_limit: usize) -> Self {
        Self {
            embedder,
            index,
            candidate_limit: candidate_limit.max(1),
        }
    }

    /// Select the schema subset most relevant to `question` within `budget`
    /// tokens.
    #[instrument(skip_all, fields(budget))]
    pub async fn retrieve(&self, question: &str, budget: usize) -> Result<RetrievalContext, RetrievalError> {
        let vector = self.embedder.embed_single(question).await?;
        let hits = self.index.search(&vector, self.candidate_limit).await?;
        let candidates = parse_hits(hits);

        let present: std::collections::HashSet<String> =
            candidates.iter().map(|c| c.element.key()).collect();
        let mut parents = HashMap::new();
        for candidate in &candidates {
            let Some(parent_key) = candidate.element.parent_key() else {
                continue;
            };
            if present.contains(&parent_key) || parents.contains_key(&parent_key) {
                continue;
            }
            if let Some(entry) = self.index.get(&parent_key).await? {
                if !entry.active {
                    continue;
                }
                match serde_json::from_value::<SchemaElement>(entry.metadata) {
                    Ok(parent) => {
                        let _ = parents.insert(parent_key, parent);
                    }
                    Err(e) => warn!(id = %entry.id, error = %e, "unreadable index metadata"),
                }
            }
        }

        let ctx = assemble(candidates, &parents, budget)?;
        debug!(
            elements = ctx.len(),
            cost = ctx.total_cost(),
            tables = ctx.tables().count(),
            "context assembled"
        );
        Ok(ctx)
    }
}

fn parse_hits(hits: Vec<SearchHit>) -> Vec<Candidate> {
    hits.into_iter()
        .filter_map(|hit| match serde_json::from_value::<SchemaElement>(hit.metadata) {
            Ok(element) => Some(Candidate {
                element,
                score: hit.score,
            }),
            Err(e) => {
                warn!(id = %hit.id, error = %e, "unreadable index metadata, skipping hit");
                None
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(element: SchemaElement, score: f32) -> Candidate {
        Candidate { element, score }
    }

    fn table(name: &str) -> SchemaElement {
        SchemaElement::table(name)
    }

    fn col(t: &str, c: &str) -> SchemaElement {
        SchemaElement::column(t, c, "INTEGER")
    }

    #[test]
    fn ties_put_tables_first_then_names() {
        let mut c = vec![
            cand(col("b", "x"), 0.5),
            cand(table("b"), 0.5),
            cand(table("a"), 0.5),
            cand(col("a", "y"), 0.9),
        ];
        c.sort_by(rank);
        let keys: Vec<String> = c.iter().map(|c| c.element.key()).collect();
        assert_eq!(keys, vec!["a.y", "a", "b", "b.x"]);
    }

    #[test]
    fn column_pulls_in_its_table_first() {
        let ctx = assemble(
            vec![cand(col("Orders", "customer_id"), 0.9), cand(table("Orders"), 0.2)],
            &HashMap::new(),
            1000,
        )
        .unwrap();
        let names: Vec<&str> = ctx
            .entries()
            .iter()
            .map(|e| e.element.qualified_name.as_str())
            .collect();
        assert_eq!(names, vec!["Orders", "Orders.customer_id"]);
        assert!((ctx.entries()[0].score - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn parent_from_lookup_when_not_a_hit() {
        let parents = HashMap::from([("orders".to_string(), table("Orders"))]);
        let ctx = assemble(vec![cand(col("Orders", "id"), 0.7)], &parents, 1000).unwrap();
        assert!(ctx.has_table("Orders"));
        assert!(ctx.column("Orders", "id").is_some());
    }

    #[test]
    fn orphan_column_is_skipped() {
        let ctx = assemble(
            vec![cand(col("ghost", "id"), 0.9), cand(table("Orders"), 0.1)],
            &HashMap::new(),
            1000,
        )
        .unwrap();
        assert_eq!(ctx.len(), 1);
        assert!(ctx.has_table("Orders"));
    }

    #[test]
    fn stops_at_first_candidate_that_does_not_fit() {
        let orders = table("Orders");
        let budget = element_cost(&orders) + 1;
        let ctx = assemble(
            vec![
                cand(orders, 0.9),
                cand(table("Customers_with_a_long_name"), 0.8),
                cand(table("T"), 0.1),
            ],
            &HashMap::new(),
            budget,
        )
        .unwrap();
        assert_eq!(ctx.len(), 1);
        assert!(ctx.total_cost() <= budget);
    }

    #[test]
    fn zero_budget_admits_nothing() {
        let ctx = assemble(vec![cand(table("Orders"), 1.0)], &HashMap::new(), 0).unwrap();
        assert!(ctx.is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn catalog_candidates() -> impl Strategy<Value = Vec<Candidate>> {
            prop::collection::vec(
                (0usize..6, prop::option::of(0usize..5), 0.0f32..1.0),
                0..40,
            )
            .prop_map(|raw| {
                let mut seen = std::collections::HashSet::new();
                raw.into_iter()
                    .filter_map(|(t, c, score)| {
                        let element = match c {
                            None => SchemaElement::table(format!("t{t}")),
                            Some(c) => SchemaElement::column(format!("t{t}"), format!("c{c}"), "TEXT"),
                        };
                        seen.insert(element.key()).then_some(Candidate { element, score })
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn budget_and_closure_always_hold(
                candidates in catalog_candidates(),
                budget in 0usize..120,
                lookup_even in any::<bool>(),
            ) {
                let parents: HashMap<String, SchemaElement> = (0..6)
                    .filter(|t| !lookup_even || t % 2 == 0)
                    .map(|t| (format!("t{t}"), SchemaElement::table(format!("t{t}"))))
                    .collect();
                let ctx = assemble(candidates, &parents, budget).unwrap();

                prop_assert!(ctx.total_cost() <= budget);
                prop_assert!(ctx.check_invariants().is_ok());
                for entry in ctx.entries() {
                    if let Some(parent) = entry.element.parent_key() {
                        prop_assert!(ctx.has_table(&parent));
                    }
                }
            }
        }
    }
}
