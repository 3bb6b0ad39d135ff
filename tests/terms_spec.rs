use std::future::Future;
use std::task::Poll;
use std::time::Duration;

use registrar::config::Config;
use registrar::db::Database;
use registrar::models::*;
use registrar::terms::TermLifecycleManager;
use registrar::Error;
use uuid::Uuid;

fn setup() -> (Database, TermLifecycleManager) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let terms = TermLifecycleManager::new(db.clone());
    (db, terms)
}

async fn create_session(terms: &TermLifecycleManager, name: &str) -> Session {
    terms
        .create_session(CreateSessionInput {
            name: name.to_string(),
        })
        .await
        .expect("Failed to create session")
}

async fn create_term(terms: &TermLifecycleManager, session: &Session, name: &str) -> Term {
    terms
        .create_term(
            session.id,
            CreateTermInput {
                name: name.to_string(),
                ordinal: None,
            },
        )
        .await
        .expect("Failed to create term")
}

/// Every term across `sessions` that is marked active.
async fn active_terms(terms: &TermLifecycleManager, sessions: &[&Session]) -> Vec<Term> {
    let mut active = Vec::new();
    for session in sessions {
        active.extend(
            terms
                .list_terms(session.id)
                .await
                .expect("Failed to list terms")
                .into_iter()
                .filter(|t| t.active),
        );
    }
    active
}

mod get_active {
    use super::*;

    #[tokio::test]
    async fn reports_no_active_term_before_first_activation() {
        let (_db, terms) = setup();
        let state = terms.get_active().await.expect("Query failed");
        assert_eq!(state, ActiveTermState::NoActiveTerm);
        assert!(!state.is_active());
    }
}

mod activate {
    use super::*;

    #[tokio::test]
    async fn moves_the_active_pair_across_sessions() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let s2 = create_session(&terms, "2025/2026").await;
        let t1 = create_term(&terms, &s1, "First Term").await;
        let t2 = create_term(&terms, &s1, "Second Term").await;
        let t3 = create_term(&terms, &s2, "First Term").await;

        let active = terms.activate(t1.id).await.expect("Activation failed");
        assert_eq!(active.session.id, s1.id);
        assert_eq!(active.term.id, t1.id);

        terms.activate(t3.id).await.expect("Activation failed");

        let active = terms
            .get_active()
            .await
            .expect("Query failed")
            .into_option()
            .expect("Expected an active term");
        assert_eq!(active.session.id, s2.id);
        assert_eq!(active.term.id, t3.id);

        assert!(!terms.get_session(s1.id).await.unwrap().active);
        assert!(terms.get_session(s2.id).await.unwrap().active);
        assert!(!terms.get_term(t1.id).await.unwrap().active);
        assert!(!terms.get_term(t2.id).await.unwrap().active);
        assert!(terms.get_term(t3.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn leaves_exactly_one_active_term_within_a_session() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;
        let t2 = create_term(&terms, &s1, "Second Term").await;

        terms.activate(t1.id).await.expect("Activation failed");
        terms.activate(t2.id).await.expect("Activation failed");

        let active = active_terms(&terms, &[&s1]).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, t2.id);
        assert!(terms.get_session(s1.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn bumps_the_version_on_every_change() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;
        let t2 = create_term(&terms, &s1, "Second Term").await;

        let first = terms.activate(t1.id).await.unwrap();
        let second = terms.activate(t2.id).await.unwrap();
        assert!(second.version > first.version);
    }

    #[tokio::test]
    async fn is_a_no_op_for_the_already_active_term() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;

        let first = terms.activate(t1.id).await.unwrap();
        let again = terms.activate(t1.id).await.unwrap();
        assert_eq!(again.version, first.version);
        assert_eq!(again.term.id, t1.id);
    }

    #[tokio::test]
    async fn fails_with_not_found_for_an_unknown_term() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;
        terms.activate(t1.id).await.unwrap();

        let result = terms.activate(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "term", .. })));

        let active = terms.get_active().await.unwrap().into_option().unwrap();
        assert_eq!(active.term.id, t1.id);
    }

    #[tokio::test]
    async fn releases_the_lease_after_a_failed_activation() {
        let (db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;

        assert!(terms.activate(Uuid::new_v4()).await.is_err());
        assert!(db.activation_lease_holder().unwrap().is_none());

        terms.activate(t1.id).await.expect("Activation failed");
        assert!(db.activation_lease_holder().unwrap().is_none());
    }

    #[tokio::test]
    async fn conflicts_while_another_activation_is_in_flight() {
        let (db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;

        assert!(db
            .try_acquire_activation_lease("other-node", Duration::from_secs(30))
            .unwrap());

        let result = terms.activate(t1.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(terms.get_active().await.unwrap(), ActiveTermState::NoActiveTerm);
        assert_eq!(
            db.activation_lease_holder().unwrap(),
            Some("other-node".to_string())
        );
    }

    #[tokio::test]
    async fn takes_over_an_abandoned_lease() {
        let (db, _) = setup();
        let config = Config {
            lease_ttl: Duration::ZERO,
            ..Config::default()
        };
        let terms = TermLifecycleManager::with_config(db.clone(), &config);
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;

        assert!(db
            .try_acquire_activation_lease("crashed-node", Duration::from_secs(30))
            .unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let active = terms.activate(t1.id).await.expect("Activation failed");
        assert_eq!(active.term.id, t1.id);
    }

    #[tokio::test]
    async fn completes_when_the_caller_stops_waiting() {
        let (db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        let t1 = create_term(&terms, &s1, "First Term").await;

        // Poll the activation once, then drop it as a timed-out caller would.
        let mut pending = Box::pin(terms.activate(t1.id));
        let first_poll = std::future::poll_fn(|cx| Poll::Ready(pending.as_mut().poll(cx))).await;
        assert!(first_poll.is_pending());
        drop(pending);

        let mut active = None;
        for _ in 0..200 {
            if let ActiveTermState::Active(a) = terms.get_active().await.unwrap() {
                active = Some(a);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let active = active.expect("Activation never completed");
        assert_eq!(active.term.id, t1.id);
        assert!(terms.get_session(s1.id).await.unwrap().active);

        for _ in 0..200 {
            if db.activation_lease_holder().unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(db.activation_lease_holder().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_activations_leave_one_active_pair() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("registrar.db");

        let setup_db = Database::open(path.clone()).expect("Failed to open database");
        setup_db.migrate().expect("Failed to migrate");
        let admin = TermLifecycleManager::new(setup_db);

        let s1 = create_session(&admin, "2024/2025").await;
        let s2 = create_session(&admin, "2025/2026").await;
        let mut targets = Vec::new();
        for (session, name) in [(&s1, "First"), (&s1, "Second"), (&s2, "First"), (&s2, "Second")] {
            targets.push(create_term(&admin, session, name).await);
        }

        // One connection per contender, as separate service instances would have.
        let mut handles = Vec::new();
        for term in &targets {
            let db = Database::open(path.clone()).expect("Failed to open database");
            let terms = TermLifecycleManager::new(db);
            let term_id = term.id;
            handles.push(tokio::spawn(async move { terms.activate(term_id).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.expect("Task panicked") {
                Ok(_) => succeeded += 1,
                Err(Error::Conflict(_)) => {}
                Err(e) => panic!("Unexpected error: {e}"),
            }
        }
        assert!(succeeded >= 1);

        let active_terms = active_terms(&admin, &[&s1, &s2]).await;
        assert_eq!(active_terms.len(), 1);

        let active = admin.get_active().await.unwrap().into_option().unwrap();
        assert_eq!(active.term.id, active_terms[0].id);
        assert_eq!(active.session.id, active_terms[0].session_id);

        let active_sessions: Vec<_> = admin
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.active)
            .collect();
        assert_eq!(active_sessions.len(), 1);
        assert_eq!(active_sessions[0].id, active.session.id);
    }
}

mod administration {
    use super::*;

    #[tokio::test]
    async fn lists_terms_in_ordinal_order() {
        let (_db, terms) = setup();
        let s1 = create_session(&terms, "2024/2025").await;
        create_term(&terms, &s1, "First Term").await;
        create_term(&terms, &s1, "Second Term").await;
        create_term(&terms, &s1, "Third Term").await;

        let listed = terms.list_terms(s1.id).await.unwrap();
        let ordinals: Vec<_> = listed.iter().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(listed[0].name, "First Term");
    }

    #[tokio::test]
    async fn get_term_fails_with_not_found() {
        let (_db, terms) = setup();
        let result = terms.get_term(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "term", .. })));
    }

    #[tokio::test]
    async fn delete_session_fails_with_not_found() {
        let (_db, terms) = setup();
        let result = terms.delete_session(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "session", .. })));
    }
}
