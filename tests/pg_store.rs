// tests/pg_store.rs
//
// PostgreSQL store contract. Runs only when TEST_DATABASE_URL points at a
// disposable database; otherwise each test returns early.

use chrono::{Duration, Utc};
use fakenews_pipeline::analyze::MockPrimary;
use fakenews_pipeline::model::{ClassifierOutputs, Item, Label, Prediction, RawItem, WORKFLOW_VERSION};
use fakenews_pipeline::store::{ItemQuery, ItemStore, PgStore, WatermarkStore};
use serial_test::serial;

async fn store() -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url).await.expect("connect TEST_DATABASE_URL");
    sqlx::query("TRUNCATE items, watermarks")
        .execute(store.pool())
        .await
        .expect("truncate");
    Some(store)
}

fn item(id: &str, age_min: i64) -> Item {
    let now = Utc::now();
    Item::from_raw(
        RawItem::new(id, format!("Stored headline {id} for the contract test"), now - Duration::minutes(age_min))
            .with_body("Body text"),
        "news",
        now,
    )
    .unwrap()
}

fn prediction(label: Label) -> Prediction {
    Prediction {
        label,
        confidence: 0.66,
        classifier_outputs: ClassifierOutputs {
            primary: MockPrimary::output(label, 0.66),
            secondary: None,
        },
        explanation: "test".into(),
        classified_at: Utc::now(),
        workflow_version: WORKFLOW_VERSION.to_string(),
    }
}

#[tokio::test]
#[serial]
async fn insert_if_absent_is_idempotent() {
    let Some(pg) = store().await else { return };
    let it = item("a", 1);
    assert!(pg.insert_if_absent(&it).await.unwrap());
    assert!(!pg.insert_if_absent(&it).await.unwrap());
    assert_eq!(pg.count(&ItemQuery::default()).await.unwrap(), 1);

    let back = pg.find_by_id("a").await.unwrap().unwrap();
    assert_eq!(back.title, it.title);
    assert_eq!(back.created_at.timestamp_micros(), it.created_at.timestamp_micros());
}

#[tokio::test]
#[serial]
async fn predictions_replace_and_filter() {
    let Some(pg) = store().await else { return };
    for (id, age) in [("a", 3), ("b", 2), ("c", 1)] {
        pg.insert_if_absent(&item(id, age)).await.unwrap();
    }
    assert!(pg.update_prediction("b", &prediction(Label::Fake)).await.unwrap());
    assert!(!pg.update_prediction("zzz", &prediction(Label::Fake)).await.unwrap());

    let missing: Vec<_> = pg
        .find_missing_prediction(10)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.item_id)
        .collect();
    assert_eq!(missing, vec!["c", "a"]);

    let fake = pg
        .find_recent(&ItemQuery::recent(10).label(Label::Fake))
        .await
        .unwrap();
    assert_eq!(fake.len(), 1);
    assert_eq!(fake[0].prediction.as_ref().unwrap().label, Label::Fake);

    assert!(pg.update_prediction("b", &prediction(Label::Real)).await.unwrap());
    assert_eq!(
        pg.count(&ItemQuery::default().label(Label::Fake)).await.unwrap(),
        0
    );
}

#[tokio::test]
#[serial]
async fn watermark_upsert_keeps_the_max() {
    let Some(pg) = store().await else { return };
    let t1 = Utc::now();
    pg.set("news", t1).await.unwrap();
    pg.set("news", t1 - Duration::hours(1)).await.unwrap();
    let got = pg.get("news").await.unwrap().unwrap();
    assert_eq!(got.timestamp_micros(), t1.timestamp_micros());
    assert!(pg.get("other").await.unwrap().is_none());
    assert_eq!(pg.list().await.unwrap().len(), 1);
}
