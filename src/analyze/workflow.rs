// src/analyze/workflow.rs
//! Classification workflow: bounded text -> primary -> optional LLM -> reconcile -> persist.

use chrono::Utc;
use metrics::counter;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::{fallback_explanation, quota_note, DynLlm};
use crate::analyze::limiter::Pacer;
use crate::analyze::primary::DynPrimary;
use crate::analyze::reconcile::reconcile;
use crate::analyze::text::{build_text, fingerprint};
use crate::error::ClassifyError;
use crate::model::{ClassifierOutputs, Item, Label, Prediction, PrimaryOutput, WORKFLOW_VERSION};
use crate::store::DynItemStore;

pub struct ClassificationWorkflow {
    items: DynItemStore,
    primary: DynPrimary,
    llm: DynLlm,
    pacer: Pacer,
}

impl ClassificationWorkflow {
    /// `min_interval` spaces consecutive classifications (first call is immediate).
    pub fn new(
        items: DynItemStore,
        primary: DynPrimary,
        llm: DynLlm,
        min_interval: Duration,
    ) -> Self {
        Self {
            items,
            primary,
            llm,
            pacer: Pacer::new(min_interval),
        }
    }

    /// Compute a prediction without storing it.
    pub async fn evaluate(&self, item: &Item) -> Result<Prediction, ClassifyError> {
        let text = build_text(&item.title, &item.body).ok_or_else(|| {
            ClassifyError::TextTooShort {
                item_id: item.item_id.clone(),
            }
        })?;
        let fp = fingerprint(&text);

        self.pacer.pace().await;

        let primary = match self.primary.predict(&text).await {
            Ok(p) => p,
            Err(e) => {
                counter!("classify_failures_total").increment(1);
                warn!(target: "classify", item_id = %item.item_id, text = %fp, error = %e, "primary classifier failed, degrading to UNKNOWN");
                PrimaryOutput::unknown(self.primary.model(), e)
            }
        };

        let (secondary, explanation) = if self.llm.is_enabled() {
            let secondary = self.llm.classify(&text).await;
            let explanation = if secondary.rate_limited {
                info!(target: "classify", item_id = %item.item_id, "llm quota exhausted, skipping explanation");
                quota_note(&primary)
            } else {
                self.llm.explain(&text, &primary, &secondary).await
            };
            (Some(secondary), explanation)
        } else {
            (None, fallback_explanation(&primary))
        };

        let label = reconcile(primary.label, secondary.as_ref().map(|s| s.label));
        let confidence = if label == Label::Unknown {
            0.0
        } else {
            primary.confidence
        };

        debug!(
            target: "classify",
            item_id = %item.item_id,
            text = %fp,
            primary = %primary.label,
            secondary = ?secondary.as_ref().map(|s| s.label),
            reconciled = %label,
            "reconciled prediction"
        );

        Ok(Prediction {
            label,
            confidence,
            classifier_outputs: ClassifierOutputs { primary, secondary },
            explanation,
            classified_at: Utc::now(),
            workflow_version: WORKFLOW_VERSION.to_string(),
        })
    }

    /// Evaluate and attach the prediction to the stored item.
    /// A missing item is logged, not treated as an error.
    pub async fn classify(&self, item: &Item) -> Result<Prediction, ClassifyError> {
        let prediction = self.evaluate(item).await?;
        let matched = self
            .items
            .update_prediction(&item.item_id, &prediction)
            .await?;
        if !matched {
            warn!(target: "classify", item_id = %item.item_id, "item vanished before its prediction was stored");
        }
        counter!("classify_predictions_total", "label" => prediction.label.as_str()).increment(1);
        info!(
            target: "classify",
            item_id = %item.item_id,
            label = %prediction.label,
            confidence = prediction.confidence,
            "item classified"
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{DisabledLlm, LlmClient, MockProvider};
    use crate::analyze::limiter::{RetryPolicy, SlidingWindowLimiter};
    use crate::analyze::primary::MockPrimary;
    use crate::model::RawItem;
    use crate::store::{ItemStore, MemoryStore};
    use std::sync::Arc;

    fn item(id: &str, title: &str) -> Item {
        Item::from_raw(RawItem::new(id, title, Utc::now()), "news", Utc::now()).unwrap()
    }

    fn llm(replies: Vec<Result<String, u16>>) -> DynLlm {
        Arc::new(LlmClient::with_parts(
            MockProvider::scripted(replies),
            "mock-llm",
            SlidingWindowLimiter::new(60, Duration::from_secs(60)),
            RetryPolicy::new(3, Duration::ZERO),
        ))
    }

    async fn setup(primary: MockPrimary, llm: DynLlm) -> (Arc<MemoryStore>, ClassificationWorkflow) {
        let store = Arc::new(MemoryStore::new());
        let wf = ClassificationWorkflow::new(store.clone(), Arc::new(primary), llm, Duration::ZERO);
        (store, wf)
    }

    #[tokio::test]
    async fn primary_failure_degrades_to_unknown_and_is_stored() {
        let (store, wf) = setup(MockPrimary::failing(), Arc::new(DisabledLlm)).await;
        let it = item("a", "Something happened in the capital today");
        store.insert_if_absent(&it).await.unwrap();

        let p = wf.classify(&it).await.unwrap();
        assert_eq!(p.label, Label::Unknown);
        assert_eq!(p.confidence, 0.0);
        assert!(p.classifier_outputs.primary.error.is_some());

        let stored = store.find_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.prediction.unwrap().label, Label::Unknown);
    }

    #[tokio::test]
    async fn disabled_llm_keeps_primary_label_with_fallback_text() {
        let (_s, wf) = setup(MockPrimary::fixed(Label::Fake, 0.9), Arc::new(DisabledLlm)).await;
        let p = wf.evaluate(&item("a", "Aliens endorse candidate")).await.unwrap();
        assert_eq!(p.label, Label::Fake);
        assert_eq!(p.confidence, 0.9);
        assert!(p.classifier_outputs.secondary.is_none());
        assert!(p.explanation.contains("Fallback"));
        assert_eq!(p.workflow_version, WORKFLOW_VERSION);
    }

    #[tokio::test]
    async fn agreement_and_disagreement_reconcile() {
        let fake = r#"{"label":"fake","confidence":0.8,"reason":"x"}"#.to_string();
        let real = r#"{"label":"real","confidence":0.8,"reason":"x"}"#.to_string();

        let (_s, wf) = setup(
            MockPrimary::fixed(Label::Fake, 0.9),
            llm(vec![Ok(fake), Ok("analysis".into())]),
        )
        .await;
        let p = wf.evaluate(&item("a", "Aliens endorse candidate")).await.unwrap();
        assert_eq!(p.label, Label::Fake);
        assert_eq!(p.confidence, 0.9);
        assert_eq!(p.explanation, "analysis");

        let (_s, wf) = setup(
            MockPrimary::fixed(Label::Fake, 0.9),
            llm(vec![Ok(real), Ok("analysis".into())]),
        )
        .await;
        let p = wf.evaluate(&item("b", "Aliens endorse candidate")).await.unwrap();
        assert_eq!(p.label, Label::Uncertain);
        assert_eq!(p.confidence, 0.9);
    }

    #[tokio::test]
    async fn rate_limited_llm_skips_explanation_call() {
        let provider_llm = Arc::new(LlmClient::with_parts(
            MockProvider::scripted(vec![Err(429), Err(429), Err(429)]),
            "mock-llm",
            SlidingWindowLimiter::new(60, Duration::from_secs(60)),
            RetryPolicy::new(3, Duration::ZERO),
        ));
        let (_s, wf) = setup(MockPrimary::fixed(Label::Real, 0.7), provider_llm.clone()).await;
        let p = wf.evaluate(&item("a", "Council approves new park")).await.unwrap();

        let secondary = p.classifier_outputs.secondary.unwrap();
        assert!(secondary.rate_limited);
        assert_eq!(secondary.label, Label::Uncertain);
        assert_eq!(p.label, Label::Real);
        assert!(p.explanation.contains("Quota Exceeded"));
        // three classify attempts, no explain call
        assert_eq!(provider_llm.provider().calls(), 3);
    }

    #[tokio::test]
    async fn short_text_is_rejected_before_any_call() {
        let primary = Arc::new(MockPrimary::fixed(Label::Real, 0.9));
        let store = Arc::new(MemoryStore::new());
        let wf = ClassificationWorkflow::new(
            store,
            primary.clone(),
            Arc::new(DisabledLlm),
            Duration::ZERO,
        );
        let err = wf.classify(&item("a", "tiny")).await.unwrap_err();
        assert!(matches!(err, ClassifyError::TextTooShort { .. }));
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn missing_item_is_not_an_error() {
        let (_s, wf) = setup(MockPrimary::fixed(Label::Real, 0.9), Arc::new(DisabledLlm)).await;
        let p = wf.classify(&item("ghost", "Never inserted into the store")).await;
        assert!(p.is_ok());
    }
}
