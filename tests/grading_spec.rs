use std::time::Duration;

use registrar::config::{Config, RetryPolicy};
use registrar::db::Database;
use registrar::grading::{GradeResolutionEngine, RuleSetViolation, ScoreRange};
use registrar::models::*;
use registrar::Error;
use uuid::Uuid;

fn setup() -> (Database, GradeResolutionEngine) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let engine = GradeResolutionEngine::new(db.clone());
    (db, engine)
}

fn input(min: u32, max: Option<u32>, grade: &str) -> CreateGradingRuleInput {
    CreateGradingRuleInput {
        min_score: min,
        max_score: max,
        grade: grade.to_string(),
        remark: format!("{} remark", grade),
    }
}

fn standard_rules() -> Vec<CreateGradingRuleInput> {
    vec![
        input(0, Some(39), "F"),
        input(40, Some(59), "D"),
        input(60, Some(69), "C"),
        input(70, Some(79), "B"),
        input(80, Some(100), "A"),
    ]
}

async fn seeded() -> (Database, GradeResolutionEngine) {
    let (db, engine) = setup();
    engine
        .replace_rules(standard_rules())
        .await
        .expect("Failed to seed rules");
    (db, engine)
}

async fn grade_of(engine: &GradeResolutionEngine, score: f64) -> String {
    engine.resolve(score).await.expect("Resolve failed").grade
}

fn rule_id(rules: &[GradingRule], grade: &str) -> Uuid {
    rules
        .iter()
        .find(|r| r.grade == grade)
        .map(|r| r.id)
        .expect("Rule not found")
}

mod resolve {
    use super::*;

    #[tokio::test]
    async fn resolves_boundaries_to_their_owning_rule() {
        let (_db, engine) = seeded().await;

        assert_eq!(grade_of(&engine, 40.0).await, "D");
        assert_eq!(grade_of(&engine, 100.0).await, "A");
        assert_eq!(grade_of(&engine, 39.0).await, "F");
        assert_eq!(grade_of(&engine, 0.0).await, "F");
        assert_eq!(grade_of(&engine, 79.5).await, "B");
    }

    #[tokio::test]
    async fn returns_the_remark_with_the_grade() {
        let (_db, engine) = seeded().await;
        let rule = engine.resolve(65.0).await.unwrap();
        assert_eq!(rule.grade, "C");
        assert_eq!(rule.remark, "C remark");
    }

    #[tokio::test]
    async fn rejects_scores_outside_the_domain() {
        let (_db, engine) = seeded().await;

        assert!(matches!(engine.resolve(101.0).await, Err(Error::OutOfRange(_))));
        assert!(matches!(engine.resolve(-0.5).await, Err(Error::OutOfRange(_))));
        assert!(matches!(engine.resolve(f64::NAN).await, Err(Error::OutOfRange(_))));
    }

    #[tokio::test]
    async fn fails_on_an_empty_store() {
        let (_db, engine) = setup();
        let result = engine.resolve(50.0).await;
        assert!(matches!(
            result,
            Err(Error::InvalidRuleSet(RuleSetViolation::Gap(range))) if range == ScoreRange::closed(0, 100)
        ));
    }

    #[tokio::test]
    async fn resolves_a_batch_in_input_order() {
        let (_db, engine) = seeded().await;

        let grades: Vec<_> = engine
            .resolve_batch(vec![85.0, 12.0, 101.0, 60.0])
            .await
            .expect("Failed to load rules")
            .collect();

        assert_eq!(grades.len(), 4);
        assert_eq!(grades[0].as_ref().unwrap().grade, "A");
        assert_eq!(grades[1].as_ref().unwrap().grade, "F");
        assert!(matches!(grades[2], Err(Error::OutOfRange(_))));
        assert_eq!(grades[3].as_ref().unwrap().grade, "C");
    }

    #[tokio::test]
    async fn keeps_resolving_against_the_set_it_loaded() {
        let (_db, engine) = seeded().await;
        let batch = engine.resolve_batch(vec![45.0]).await.unwrap();
        assert_eq!(batch.rule_set().version(), 1);

        engine
            .replace_rules(vec![input(0, Some(49), "Fail"), input(50, None, "Pass")])
            .await
            .unwrap();

        let grades: Vec<_> = batch.map(|g| g.unwrap().grade).collect();
        assert_eq!(grades, vec!["D"]);
        assert_eq!(grade_of(&engine, 45.0).await, "Fail");
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn rejects_a_replacement_with_a_gap_and_keeps_the_old_rules() {
        let (_db, engine) = seeded().await;

        let result = engine
            .replace_rules(vec![input(0, Some(39), "F"), input(41, Some(100), "P")])
            .await;

        match result {
            Err(Error::InvalidRuleSet(violation)) => {
                assert_eq!(violation, RuleSetViolation::Gap(ScoreRange::closed(40, 40)));
                assert_eq!(violation.range().to_string(), "[40,40]");
            }
            other => panic!("Expected a gap, got {:?}", other),
        }
        assert_eq!(engine.list_rules().await.unwrap().len(), 5);
        assert_eq!(grade_of(&engine, 40.0).await, "D");
    }

    #[tokio::test]
    async fn rejects_a_shared_boundary_as_an_overlap() {
        let (_db, engine) = setup();

        let result = engine
            .replace_rules(vec![input(0, Some(50), "F"), input(50, Some(100), "P")])
            .await;

        match result {
            Err(Error::InvalidRuleSet(RuleSetViolation::Overlap(range))) => {
                assert_eq!(range, ScoreRange::closed(50, 50));
            }
            other => panic!("Expected an overlap, got {:?}", other),
        }
        assert!(engine.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepts_a_top_rule_bounded_past_the_domain() {
        let (_db, engine) = setup();

        engine
            .replace_rules(vec![input(0, Some(79), "P"), input(80, Some(150), "A")])
            .await
            .expect("Covering set rejected");
        assert_eq!(grade_of(&engine, 100.0).await, "A");

        engine
            .replace_rules(vec![input(0, Some(49), "F"), input(50, Some(u32::MAX), "P")])
            .await
            .expect("Covering set rejected");
        assert_eq!(grade_of(&engine, 100.0).await, "P");
        assert_eq!(grade_of(&engine, 49.0).await, "F");
    }

    #[tokio::test]
    async fn validates_without_storing() {
        let (_db, engine) = setup();
        assert!(engine.validate_rule_set(&standard_rules()).is_ok());
        assert!(engine.list_rules().await.unwrap().is_empty());
    }
}

mod edits {
    use super::*;

    #[tokio::test]
    async fn lists_rules_by_descending_minimum() {
        let (_db, engine) = seeded().await;
        let grades: Vec<_> = engine
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.grade)
            .collect();
        assert_eq!(grades, vec!["A", "B", "C", "D", "F"]);
    }

    #[tokio::test]
    async fn moves_a_boundary_with_two_consistent_edits() {
        let (_db, engine) = setup();
        let rules = engine
            .replace_rules(vec![input(0, Some(49), "Fail"), input(50, None, "Pass")])
            .await
            .unwrap();
        let fail = rule_id(&rules, "Fail");
        let pass = rule_id(&rules, "Pass");

        // Moving either bound alone would open a gap or overlap.
        let lone = engine
            .update_rule(
                pass,
                UpdateGradingRuleInput {
                    min_score: Some(45),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(lone, Err(Error::InvalidRuleSet(RuleSetViolation::Overlap(_)))));

        // A full replacement moves both at once.
        engine
            .replace_rules(vec![input(0, Some(44), "Fail"), input(45, None, "Pass")])
            .await
            .unwrap();
        assert_eq!(grade_of(&engine, 45.0).await, "Pass");
        assert!(engine.list_rules().await.unwrap().iter().all(|r| r.id != fail));
    }

    #[tokio::test]
    async fn updates_labels_in_place() {
        let (_db, engine) = seeded().await;
        let rules = engine.list_rules().await.unwrap();
        let a = rule_id(&rules, "A");

        let updated = engine
            .update_rule(
                a,
                UpdateGradingRuleInput {
                    grade: Some("A+".to_string()),
                    remark: Some("Excellent".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("Update failed");

        assert_eq!(updated.id, a);
        assert_eq!(updated.min_score, 80);
        assert_eq!(grade_of(&engine, 95.0).await, "A+");
    }

    #[tokio::test]
    async fn makes_the_top_rule_unbounded() {
        let (_db, engine) = seeded().await;
        let a = rule_id(&engine.list_rules().await.unwrap(), "A");

        let updated = engine
            .update_rule(
                a,
                UpdateGradingRuleInput {
                    max_score: Some(None),
                    ..Default::default()
                },
            )
            .await
            .expect("Update failed");
        assert_eq!(updated.max_score, None);
    }

    #[tokio::test]
    async fn rejects_a_delete_that_opens_a_gap() {
        let (_db, engine) = seeded().await;
        let c = rule_id(&engine.list_rules().await.unwrap(), "C");

        let result = engine.delete_rule(c).await;
        match result {
            Err(Error::InvalidRuleSet(RuleSetViolation::Gap(range))) => {
                assert_eq!(range, ScoreRange::closed(60, 69));
            }
            other => panic!("Expected a gap, got {:?}", other),
        }
        assert_eq!(engine.list_rules().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn rejects_a_create_that_overlaps() {
        let (_db, engine) = seeded().await;
        let result = engine.create_rule(input(90, Some(100), "A*")).await;
        assert!(matches!(result, Err(Error::InvalidRuleSet(RuleSetViolation::Overlap(_)))));
    }

    #[tokio::test]
    async fn replacement_retires_the_old_rule_ids() {
        let (_db, engine) = setup();
        engine
            .replace_rules(vec![input(0, Some(100), "All")])
            .await
            .unwrap();
        let all = rule_id(&engine.list_rules().await.unwrap(), "All");

        engine
            .replace_rules(vec![input(0, Some(49), "Low"), input(50, Some(100), "High")])
            .await
            .unwrap();
        assert!(matches!(
            engine.update_rule(all, UpdateGradingRuleInput::default()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reports_missing_rules_as_not_found() {
        let (_db, engine) = seeded().await;
        assert!(matches!(
            engine.delete_rule(Uuid::new_v4()).await,
            Err(Error::NotFound { entity: "grading rule", .. })
        ));
    }

    #[tokio::test]
    async fn serializes_concurrent_edits() {
        let (db, _) = setup();
        let config = Config {
            retry: RetryPolicy::new(10, Duration::from_millis(1)),
            ..Config::default()
        };
        let engine = GradeResolutionEngine::with_config(db.clone(), &config);
        engine.replace_rules(standard_rules()).await.unwrap();
        let rules = engine.list_rules().await.unwrap();

        let relabel = |grade: &str| {
            let engine = engine.clone();
            let id = rule_id(&rules, grade);
            let label = format!("{}!", grade);
            tokio::spawn(async move {
                engine
                    .update_rule(
                        id,
                        UpdateGradingRuleInput {
                            grade: Some(label),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };
        let handles = vec![relabel("A"), relabel("B"), relabel("C")];
        for handle in handles {
            handle.await.unwrap().expect("Edit failed");
        }

        let grades: Vec<_> = engine
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.grade)
            .collect();
        assert_eq!(grades, vec!["A!", "B!", "C!", "D", "F"]);

        let (_, version) = db.rule_set_snapshot().unwrap();
        assert_eq!(version, 4);
    }
}
