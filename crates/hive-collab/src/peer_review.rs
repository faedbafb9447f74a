//! Peer review cycles for work products.
//!
//! One cycle runs assign -> collect -> aggregate -> finalize. Reviewers
//! with critic-like expertise produce a dialectical response (thesis,
//! antithesis, synthesis). Aggregation majority-votes each acceptance
//! criterion and averages quality metrics; the quality score is the mean
//! of the per-metric means, zero when there are none. A finalize that
//! cannot approve leads into a revision loop bounded by
//! `max_revision_cycles`, each revision producing a new review linked to
//! its predecessor.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_core::{HiveResult, MemoryItem, MemoryType, MetadataValue};
use hive_memory::MemoryCoordinator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::message::MessageType;
use crate::service::{CollaborationService, CollaborativeAgent};

/// Quality score below which a review cannot be approved
pub const QUALITY_THRESHOLD: f64 = 0.7;

/// Status of a review cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    RevisionRequested,
    Revised,
    Approved,
    Rejected,
    RevisionSuggested,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RevisionRequested => "revision_requested",
            Self::Revised => "revised",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RevisionSuggested => "revision_suggested",
        }
    }
}

/// Dialectical critique produced by critic-like reviewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialecticalNote {
    pub thesis: String,
    pub antithesis: String,
    pub synthesis: String,
}

impl Default for DialecticalNote {
    fn default() -> Self {
        Self {
            thesis: "The solution provides basic functionality.".to_string(),
            antithesis: "The solution could be improved in several ways.".to_string(),
            synthesis: "An improved implementation would address the identified issues."
                .to_string(),
        }
    }
}

/// One reviewer's processed feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub reviewer: String,
    pub feedback: String,
    #[serde(default)]
    pub criteria_results: BTreeMap<String, bool>,
    #[serde(default)]
    pub metrics_results: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialectic: Option<DialecticalNote>,
}

/// A participant in a review: a name, optionally backed by an agent
#[derive(Clone)]
pub struct ReviewParticipant {
    pub name: String,
    pub agent: Option<Arc<dyn CollaborativeAgent>>,
}

impl ReviewParticipant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: None,
        }
    }

    pub fn agent(agent: Arc<dyn CollaborativeAgent>) -> Self {
        Self {
            name: agent.id().to_string(),
            agent: Some(agent),
        }
    }

    fn is_critic(&self) -> bool {
        self.agent
            .as_ref()
            .map(|agent| {
                agent.expertise().iter().any(|expertise| {
                    matches!(
                        expertise.to_lowercase().as_str(),
                        "critic" | "dialectical" | "critique"
                    )
                })
            })
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ReviewParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewParticipant")
            .field("name", &self.name)
            .field("agent", &self.agent.is_some())
            .finish()
    }
}

/// Sink for review-request notifications
#[async_trait]
pub trait ReviewMessenger: Send + Sync {
    async fn send_review_request(
        &self,
        sender: &str,
        recipient: &str,
        content: Value,
    ) -> HiveResult<()>;
}

#[async_trait]
impl ReviewMessenger for CollaborationService {
    async fn send_review_request(
        &self,
        sender: &str,
        recipient: &str,
        content: Value,
    ) -> HiveResult<()> {
        self.send_message(sender, recipient, MessageType::ReviewRequest, &content, None)
            .await
            .map(|_| ())
    }
}

/// Aggregated view over every reviewer's feedback
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewAggregate {
    pub review_id: String,
    pub status: ReviewStatus,
    pub feedback: Vec<String>,
    pub quality_score: f64,
    pub criteria_results: BTreeMap<String, bool>,
    pub all_criteria_passed: bool,
    pub metrics_results: BTreeMap<String, f64>,
    pub dialectical: Option<DialecticalNote>,
}

/// Result of finalizing a review
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedReview {
    pub review_id: String,
    pub status: ReviewStatus,
    pub approved: bool,
    pub quality_score: f64,
    pub aggregate: ReviewAggregate,
    pub reasons: Vec<String>,
    pub previous_review_id: Option<String>,
    pub revision_count: usize,
}

/// One peer review cycle for a work product
pub struct PeerReview {
    pub review_id: String,
    pub work_product: Value,
    pub author: ReviewParticipant,
    pub reviewers: Vec<ReviewParticipant>,
    pub acceptance_criteria: Vec<String>,
    pub quality_metrics: Vec<String>,
    pub reviews: BTreeMap<String, ReviewFeedback>,
    pub revision: Option<Value>,
    pub revision_history: Vec<Value>,
    pub status: ReviewStatus,
    pub quality_score: f64,
    pub metrics_results: BTreeMap<String, f64>,
    pub previous_review_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messenger: Option<Arc<dyn ReviewMessenger>>,
    coordinator: Option<Arc<MemoryCoordinator>>,
}

impl PeerReview {
    pub fn new(
        work_product: Value,
        author: ReviewParticipant,
        reviewers: Vec<ReviewParticipant>,
    ) -> Self {
        let now = Utc::now();
        Self {
            review_id: Uuid::new_v4().to_string(),
            work_product,
            author,
            reviewers,
            acceptance_criteria: Vec::new(),
            quality_metrics: Vec::new(),
            reviews: BTreeMap::new(),
            revision: None,
            revision_history: Vec::new(),
            status: ReviewStatus::Pending,
            quality_score: 0.0,
            metrics_results: BTreeMap::new(),
            previous_review_id: None,
            created_at: now,
            updated_at: now,
            messenger: None,
            coordinator: None,
        }
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_quality_metrics(mut self, metrics: Vec<String>) -> Self {
        self.quality_metrics = metrics;
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn ReviewMessenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<MemoryCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    fn state_value(&self) -> Value {
        json!({
            "review_id": self.review_id,
            "work_product": self.work_product,
            "author": self.author.name,
            "reviewers": self.reviewers.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
            "acceptance_criteria": self.acceptance_criteria,
            "quality_metrics": self.quality_metrics,
            "reviews": self.reviews,
            "revision": self.revision,
            "revision_history": self.revision_history,
            "status": self.status.as_str(),
            "quality_score": self.quality_score,
            "metrics_results": self.metrics_results,
            "previous_review_id": self.previous_review_id,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }

    /// Persist the review state through the coordinator, best effort
    async fn store_in_memory(&self) {
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        let mut item = MemoryItem::new(
            self.review_id.clone(),
            self.state_value(),
            MemoryType::PeerReview,
        );
        item.metadata.insert(
            "entity_type".to_string(),
            MetadataValue::Text("PeerReview".into()),
        );
        item.metadata.insert(
            "status".to_string(),
            MetadataValue::Text(self.status.as_str().into()),
        );
        item.metadata.insert(
            "author_id".to_string(),
            MetadataValue::Text(self.author.name.clone()),
        );
        item.metadata.insert(
            "quality_score".to_string(),
            MetadataValue::Float(self.quality_score),
        );
        if let Err(error) = coordinator.persist_with_fanout(item).await {
            tracing::error!(
                review = %self.review_id,
                error = %error,
                "failed to store review"
            );
        }
    }

    /// Notify every reviewer of the review request
    pub async fn assign_reviews(&mut self) -> HiveResult<()> {
        self.updated_at = Utc::now();
        if let Some(messenger) = &self.messenger {
            for reviewer in &self.reviewers {
                let mut content = json!({
                    "work_product": self.work_product,
                    "review_id": self.review_id,
                });
                if !self.acceptance_criteria.is_empty() {
                    content["acceptance_criteria"] = json!(self.acceptance_criteria);
                }
                if !self.quality_metrics.is_empty() {
                    content["quality_metrics"] = json!(self.quality_metrics);
                }
                messenger
                    .send_review_request(&self.author.name, &reviewer.name, content)
                    .await?;
            }
        }
        self.store_in_memory().await;
        Ok(())
    }

    /// Gather feedback from every reviewer.
    ///
    /// A reviewer without an agent yields simulated feedback; a failing
    /// agent yields structured error feedback. Missing criteria results
    /// default to pass and missing metric scores to 1.0.
    pub async fn collect_reviews(&mut self) -> BTreeMap<String, ReviewFeedback> {
        self.updated_at = Utc::now();

        for reviewer in self.reviewers.clone() {
            let is_critic = reviewer.is_critic();
            let result = match &reviewer.agent {
                Some(agent) => {
                    let mut request = json!({
                        "work_product": self.work_product,
                        "review_id": self.review_id,
                        "acceptance_criteria": self.acceptance_criteria,
                        "quality_metrics": self.quality_metrics,
                    });
                    if is_critic {
                        request["task"] = json!("perform_dialectical_critique");
                        request["critique_aspects"] = json!([
                            "security",
                            "performance",
                            "maintainability",
                            "readability",
                            "error_handling",
                            "input_validation",
                        ]);
                    }
                    match agent.process(request).await {
                        Ok(result) => result,
                        Err(error) => {
                            tracing::error!(
                                reviewer = %reviewer.name,
                                error = %error,
                                "reviewer failed to process"
                            );
                            json!({ "feedback": format!("Error processing review: {error}") })
                        }
                    }
                }
                None => json!({ "feedback": "ok" }),
            };

            let feedback = self.feedback_from_result(&reviewer.name, &result, is_critic);
            self.reviews.insert(reviewer.name.clone(), feedback);
        }

        self.calculate_quality_score();
        self.store_in_memory().await;
        self.reviews.clone()
    }

    fn feedback_from_result(
        &self,
        reviewer: &str,
        result: &Value,
        is_critic: bool,
    ) -> ReviewFeedback {
        let feedback = result
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let criteria_results: BTreeMap<String, bool> = match result
            .get("criteria_results")
            .and_then(Value::as_object)
        {
            Some(map) => self
                .acceptance_criteria
                .iter()
                .map(|criterion| {
                    let passed = map
                        .get(criterion)
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    (criterion.clone(), passed)
                })
                .collect(),
            None => self
                .acceptance_criteria
                .iter()
                .map(|criterion| (criterion.clone(), true))
                .collect(),
        };

        let metrics_results: BTreeMap<String, f64> = match result
            .get("metrics_results")
            .and_then(Value::as_object)
        {
            Some(map) => self
                .quality_metrics
                .iter()
                .map(|metric| {
                    let score = map.get(metric).and_then(Value::as_f64).unwrap_or(1.0);
                    (metric.clone(), score)
                })
                .collect(),
            None => self
                .quality_metrics
                .iter()
                .map(|metric| (metric.clone(), 1.0))
                .collect(),
        };

        let dialectic = if is_critic {
            Some(DialecticalNote {
                thesis: result
                    .get("thesis")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| DialecticalNote::default().thesis),
                antithesis: result
                    .get("antithesis")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| DialecticalNote::default().antithesis),
                synthesis: result
                    .get("synthesis")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| DialecticalNote::default().synthesis),
            })
        } else {
            None
        };

        ReviewFeedback {
            reviewer: reviewer.to_string(),
            feedback,
            criteria_results,
            metrics_results,
            dialectic,
        }
    }

    /// Quality score = mean of the per-metric means, zero without metrics
    fn calculate_quality_score(&mut self) {
        self.metrics_results.clear();
        if self.quality_metrics.is_empty() || self.reviews.is_empty() {
            self.quality_score = 0.0;
            return;
        }

        let mut total = 0.0;
        let mut count = 0usize;
        let mut per_metric: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for review in self.reviews.values() {
            for (metric, score) in &review.metrics_results {
                total += score;
                count += 1;
                per_metric.entry(metric.clone()).or_default().push(*score);
            }
        }

        self.quality_score = if count > 0 { total / count as f64 } else { 0.0 };
        for (metric, scores) in per_metric {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            self.metrics_results.insert(metric, mean);
        }
    }

    /// Collapse per-reviewer feedback into a single report
    pub fn aggregate_feedback(&self) -> ReviewAggregate {
        let feedback: Vec<String> = self
            .reviews
            .values()
            .map(|review| review.feedback.clone())
            .collect();

        let mut criteria_results = BTreeMap::new();
        for criterion in &self.acceptance_criteria {
            let votes: Vec<bool> = self
                .reviews
                .values()
                .filter_map(|review| review.criteria_results.get(criterion).copied())
                .collect();
            let passed = if votes.is_empty() {
                true
            } else {
                votes.iter().filter(|vote| **vote).count() * 2 > votes.len()
            };
            criteria_results.insert(criterion.clone(), passed);
        }
        let all_criteria_passed = criteria_results.values().all(|passed| *passed);

        let dialectical = self
            .reviews
            .values()
            .find_map(|review| review.dialectic.clone());

        ReviewAggregate {
            review_id: self.review_id.clone(),
            status: self.status,
            feedback,
            quality_score: self.quality_score,
            criteria_results,
            all_criteria_passed,
            metrics_results: self.metrics_results.clone(),
            dialectical,
        }
    }

    /// Mark the review as requiring revision
    pub async fn request_revision(&mut self) {
        self.updated_at = Utc::now();
        self.status = ReviewStatus::RevisionRequested;
        self.store_in_memory().await;
    }

    /// Submit a revised work product, producing a new linked review
    pub async fn submit_revision(&mut self, revision: Value) -> PeerReview {
        self.updated_at = Utc::now();
        self.revision = Some(revision.clone());
        self.revision_history.push(revision.clone());
        self.status = ReviewStatus::Revised;
        self.store_in_memory().await;

        let mut next = PeerReview::new(
            revision,
            self.author.clone(),
            self.reviewers.clone(),
        )
        .with_acceptance_criteria(self.acceptance_criteria.clone())
        .with_quality_metrics(self.quality_metrics.clone());
        next.previous_review_id = Some(self.review_id.clone());
        next.messenger = self.messenger.clone();
        next.coordinator = self.coordinator.clone();
        next.store_in_memory().await;
        next
    }

    /// Finalize the review.
    ///
    /// Approval requires the caller's approval, all criteria passing, and
    /// a quality score at or above the threshold. Failed criteria reject;
    /// low quality without a prior revision suggests one; low quality
    /// after a revision rejects.
    pub async fn finalize(&mut self, approved: bool) -> FinalizedReview {
        self.updated_at = Utc::now();
        let mut approved = approved;
        self.status = if approved {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Rejected
        };

        let pre_aggregate = self.aggregate_feedback();
        if !self.acceptance_criteria.is_empty() && !pre_aggregate.all_criteria_passed && approved
        {
            self.status = ReviewStatus::Rejected;
            approved = false;
        }

        if self.quality_score < QUALITY_THRESHOLD && approved {
            // A review that is itself a revision counts as revised
            let revised = self.revision.is_some() || self.previous_review_id.is_some();
            if !revised && self.status != ReviewStatus::RevisionRequested {
                self.status = ReviewStatus::RevisionSuggested;
            } else if revised {
                self.status = ReviewStatus::Rejected;
                approved = false;
            }
        }

        let aggregate = self.aggregate_feedback();
        let reasons = if self.status == ReviewStatus::Rejected {
            aggregate
                .criteria_results
                .iter()
                .filter(|(_, passed)| !**passed)
                .map(|(criterion, _)| format!("{criterion}: Failed"))
                .collect()
        } else {
            Vec::new()
        };

        self.store_in_memory().await;

        FinalizedReview {
            review_id: self.review_id.clone(),
            status: self.status,
            approved,
            quality_score: self.quality_score,
            aggregate,
            reasons,
            previous_review_id: self.previous_review_id.clone(),
            revision_count: self.revision_history.len(),
        }
    }
}

/// Outcome of a full review workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub review_id: String,
    pub status: ReviewStatus,
    pub approved: bool,
    pub quality_score: f64,
    pub all_criteria_passed: bool,
    pub feedback: Vec<String>,
    pub revision_cycles: usize,
    pub max_revision_cycles: usize,
    pub previous_review_id: Option<String>,
}

/// A complete peer review workflow with bounded revision cycles
pub struct PeerReviewWorkflow {
    pub work_product: Value,
    pub author: ReviewParticipant,
    pub reviewers: Vec<ReviewParticipant>,
    pub acceptance_criteria: Vec<String>,
    pub quality_metrics: Vec<String>,
    pub max_revision_cycles: usize,
    pub messenger: Option<Arc<dyn ReviewMessenger>>,
    pub coordinator: Option<Arc<MemoryCoordinator>>,
}

impl PeerReviewWorkflow {
    pub fn new(
        work_product: Value,
        author: ReviewParticipant,
        reviewers: Vec<ReviewParticipant>,
    ) -> Self {
        Self {
            work_product,
            author,
            reviewers,
            acceptance_criteria: Vec::new(),
            quality_metrics: Vec::new(),
            max_revision_cycles: 3,
            messenger: None,
            coordinator: None,
        }
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_quality_metrics(mut self, metrics: Vec<String>) -> Self {
        self.quality_metrics = metrics;
        self
    }

    pub fn with_max_revision_cycles(mut self, max: usize) -> Self {
        self.max_revision_cycles = max;
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn ReviewMessenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<MemoryCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    fn build_review(&self, work_product: Value) -> PeerReview {
        let mut review = PeerReview::new(
            work_product,
            self.author.clone(),
            self.reviewers.clone(),
        )
        .with_acceptance_criteria(self.acceptance_criteria.clone())
        .with_quality_metrics(self.quality_metrics.clone());
        review.messenger = self.messenger.clone();
        review.coordinator = self.coordinator.clone();
        review
    }

    async fn revision_from_author(&self, request: Value, revision_number: usize) -> Value {
        if let Some(agent) = &self.author.agent {
            match agent.revise(request.clone()).await {
                Ok(Some(revision)) => return revision,
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(
                        author = %self.author.name,
                        error = %error,
                        "author failed to revise"
                    );
                }
            }
        }
        // No author-provided revision available; synthesize a placeholder
        json!({
            "original": request.get("original_work").cloned().unwrap_or(Value::Null),
            "revision": format!("Revision {revision_number}"),
            "revision_number": revision_number,
            "improvements": "Addressed reviewer feedback (simulated)",
            "is_simulated": true,
        })
    }

    /// Run assign -> collect -> aggregate, revising until criteria pass
    /// and quality clears the threshold or the cycle budget runs out.
    pub async fn run(&self) -> HiveResult<ReviewOutcome> {
        let mut current = self.build_review(self.work_product.clone());
        current.assign_reviews().await?;
        current.collect_reviews().await;
        let mut aggregate = current.aggregate_feedback();

        let mut revision_cycles = 0usize;
        while (!aggregate.all_criteria_passed || aggregate.quality_score < QUALITY_THRESHOLD)
            && revision_cycles < self.max_revision_cycles
        {
            current.request_revision().await;

            let request = json!({
                "original_work": current.work_product,
                "feedback_summary": aggregate.feedback.join("; "),
                "criteria_results": aggregate.criteria_results,
                "revision_number": revision_cycles + 1,
            });
            let revised = self
                .revision_from_author(request, revision_cycles + 1)
                .await;

            current = current.submit_revision(revised).await;
            current.assign_reviews().await?;
            current.collect_reviews().await;
            aggregate = current.aggregate_feedback();
            revision_cycles += 1;
        }

        let approved =
            aggregate.all_criteria_passed && aggregate.quality_score >= QUALITY_THRESHOLD;
        let finalized = current.finalize(approved).await;

        Ok(ReviewOutcome {
            review_id: finalized.review_id,
            status: finalized.status,
            approved: finalized.approved,
            quality_score: finalized.quality_score,
            all_criteria_passed: finalized.aggregate.all_criteria_passed,
            feedback: finalized.aggregate.feedback,
            revision_cycles,
            max_revision_cycles: self.max_revision_cycles,
            previous_review_id: finalized.previous_review_id,
        })
    }
}

/// Convenience wrapper running a full review with the given settings
pub async fn run_peer_review(
    work_product: Value,
    author: ReviewParticipant,
    reviewers: Vec<ReviewParticipant>,
    acceptance_criteria: Vec<String>,
    quality_metrics: Vec<String>,
    max_revision_cycles: usize,
) -> HiveResult<ReviewOutcome> {
    PeerReviewWorkflow::new(work_product, author, reviewers)
        .with_acceptance_criteria(acceptance_criteria)
        .with_quality_metrics(quality_metrics)
        .with_max_revision_cycles(max_revision_cycles)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Reviewer whose scripted responses are returned in order
    struct ScriptedReviewer {
        id: String,
        expertise: Vec<String>,
        responses: Mutex<Vec<Value>>,
    }

    impl ScriptedReviewer {
        fn new(id: &str, responses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                expertise: Vec::new(),
                responses: Mutex::new(responses),
            })
        }

        fn critic(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                expertise: vec!["critic".to_string()],
                responses: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CollaborativeAgent for ScriptedReviewer {
        fn id(&self) -> &str {
            &self.id
        }

        fn expertise(&self) -> Vec<String> {
            self.expertise.clone()
        }

        async fn process(&self, _request: Value) -> HiveResult<Value> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(json!({ "feedback": "ok" }))
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn single_cycle_approves_clean_work() {
        let reviewer = ScriptedReviewer::new("rev", vec![]);
        let outcome = run_peer_review(
            json!({"code": "fn main() {}"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(reviewer)],
            vec!["compiles".to_string()],
            vec!["clarity".to_string()],
            3,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ReviewStatus::Approved);
        assert!(outcome.approved);
        assert_eq!(outcome.revision_cycles, 0);
        assert!((outcome.quality_score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_criteria_then_pass_takes_one_revision() {
        // Cycle 1 fails the criterion, cycle 2 passes it
        let reviewer = ScriptedReviewer::new(
            "rev",
            vec![
                json!({
                    "feedback": "needs work",
                    "criteria_results": { "compiles": false },
                }),
                json!({
                    "feedback": "looks good now",
                    "criteria_results": { "compiles": true },
                }),
            ],
        );
        let outcome = run_peer_review(
            json!({"code": "fn main() {"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(reviewer)],
            vec!["compiles".to_string()],
            vec!["clarity".to_string()],
            3,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ReviewStatus::Approved);
        assert!(outcome.approved);
        assert_eq!(outcome.revision_cycles, 1);
        assert!(outcome.previous_review_id.is_some());
    }

    #[tokio::test]
    async fn revision_cycles_never_exceed_budget() {
        // The reviewer never passes the criterion
        let always_fail = json!({
            "feedback": "still broken",
            "criteria_results": { "compiles": false },
        });
        let reviewer = ScriptedReviewer::new(
            "rev",
            vec![
                always_fail.clone(),
                always_fail.clone(),
                always_fail.clone(),
                always_fail.clone(),
                always_fail,
            ],
        );
        let outcome = run_peer_review(
            json!({"code": "broken"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(reviewer)],
            vec!["compiles".to_string()],
            vec!["clarity".to_string()],
            2,
        )
        .await
        .unwrap();

        assert_eq!(outcome.revision_cycles, 2);
        assert_eq!(outcome.status, ReviewStatus::Rejected);
        assert!(!outcome.approved);
    }

    #[tokio::test]
    async fn majority_vote_decides_criteria() {
        let pass = json!({"criteria_results": {"tested": true}, "feedback": "fine"});
        let fail = json!({"criteria_results": {"tested": false}, "feedback": "nope"});
        let reviewers = vec![
            ReviewParticipant::agent(ScriptedReviewer::new("a", vec![pass.clone()])),
            ReviewParticipant::agent(ScriptedReviewer::new("b", vec![pass])),
            ReviewParticipant::agent(ScriptedReviewer::new("c", vec![fail])),
        ];

        let mut review = PeerReview::new(
            json!({"doc": "x"}),
            ReviewParticipant::named("author"),
            reviewers,
        )
        .with_acceptance_criteria(vec!["tested".to_string()])
        .with_quality_metrics(vec!["depth".to_string()]);

        review.assign_reviews().await.unwrap();
        review.collect_reviews().await;
        let aggregate = review.aggregate_feedback();
        assert!(aggregate.all_criteria_passed);
        assert_eq!(aggregate.feedback.len(), 3);
    }

    #[tokio::test]
    async fn critic_reviewer_produces_dialectic() {
        let critic = ScriptedReviewer::critic("critic-1");
        let mut review = PeerReview::new(
            json!({"code": "x"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(critic)],
        )
        .with_quality_metrics(vec!["rigor".to_string()]);

        review.collect_reviews().await;
        let aggregate = review.aggregate_feedback();
        let dialectic = aggregate.dialectical.unwrap();
        assert!(!dialectic.thesis.is_empty());
        assert!(!dialectic.antithesis.is_empty());
        assert!(!dialectic.synthesis.is_empty());
    }

    #[tokio::test]
    async fn low_quality_without_revision_suggests_one() {
        let reviewer = ScriptedReviewer::new(
            "rev",
            vec![json!({
                "feedback": "meh",
                "metrics_results": { "depth": 0.4 },
            })],
        );
        let mut review = PeerReview::new(
            json!({"doc": "x"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(reviewer)],
        )
        .with_quality_metrics(vec!["depth".to_string()]);

        review.collect_reviews().await;
        let finalized = review.finalize(true).await;
        assert_eq!(finalized.status, ReviewStatus::RevisionSuggested);
        assert!((finalized.quality_score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn low_quality_after_revision_rejects() {
        let reviewer = ScriptedReviewer::new(
            "rev",
            vec![
                json!({ "metrics_results": { "depth": 0.2 }, "feedback": "weak" }),
                json!({ "metrics_results": { "depth": 0.3 }, "feedback": "still weak" }),
            ],
        );
        let outcome = run_peer_review(
            json!({"doc": "thin"}),
            ReviewParticipant::named("author"),
            vec![ReviewParticipant::agent(reviewer)],
            vec![],
            vec!["depth".to_string()],
            1,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ReviewStatus::Rejected);
        assert!(!outcome.approved);
        assert_eq!(outcome.revision_cycles, 1);
    }
}
