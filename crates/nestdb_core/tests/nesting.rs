//! Nested transaction resolution, reentrancy, and abort propagation.

use nestdb_core::{
    spawn, Config, CoreError, CoreResult, Database, HandleState, NestingPolicy, ScopeRequest,
    TransactionMode,
};
use nestdb_testkit::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ALL: [&str; 3] = ["users", "pets", "petsPerUser"];

async fn add_user(db: &Database, name: &str, pets: &[&str]) -> CoreResult<()> {
    db.transaction("rw", ALL, |_| async move {
        db.table("users")?.add(user(name)).await?;
        for kind in pets {
            let id = db.table("pets")?.add(pet(kind)).await?;
            db.table("petsPerUser")?
                .add(json!({ "user": name, "pet": id.to_string() }))
                .await?;
        }
        Ok(())
    })
    .await
}

#[tokio::test]
async fn nested_transaction_reuses_the_native_transaction() {
    init_tracing();
    let db = &TestDatabase::memory();
    db.transaction("rw", ["users", "pets"], |outer| async move {
        assert_eq!(outer.reentrancy_depth(), 0);
        db.transaction("rw", ["pets"], |inner| {
            let outer = outer.clone();
            async move {
                assert_eq!(outer.reentrancy_depth(), 1);
                assert!(inner.shares_native_with(&outer));
                assert_eq!(inner.parent().map(|parent| parent.id()), Some(outer.id()));
                assert_ne!(inner.id(), outer.id());
                db.table("pets")?.add(pet("dog")).await
            }
        })
        .await?;
        assert_eq!(outer.reentrancy_depth(), 0);
        assert_eq!(db.committed_len("pets"), 0);
        db.table("users")?.add(user("arne")).await?;
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();

    assert_eq!(db.committed_len("users"), 1);
    assert_eq!(db.committed_len("pets"), 1);
}

#[tokio::test]
async fn nested_handle_completes_with_its_parent() {
    let db = &TestDatabase::memory();
    let completed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&completed);
    let observed = Arc::clone(&completed);

    db.transaction("rw", ["users"], |_| async move {
        let inner = db
            .transaction("rw", ["users"], |inner| async move {
                inner.on_complete(move || flag.store(true, Ordering::SeqCst));
                db.table("users")?.add(user("arne")).await?;
                Ok(inner)
            })
            .await?;
        assert_eq!(inner.state(), HandleState::Committed);
        assert!(!observed.load(Ordering::SeqCst));
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();

    assert!(completed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn nested_scope_outside_the_parent_is_rejected() {
    let db = &TestDatabase::memory();
    let ran = AtomicBool::new(false);
    let ran = &ran;

    db.transaction("rw", ["users"], |outer| async move {
        let result = db
            .transaction("rw", ["users", "pets"], |_| async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match result {
            Err(CoreError::ScopeViolation { table, txn }) => {
                assert_eq!(table, "pets");
                assert_eq!(txn, outer.id());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(outer.is_active());
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn nested_write_inside_readonly_is_rejected() {
    let db = &TestDatabase::memory();
    db.transaction("r", ["users"], |_| async move {
        let result = db.transaction("rw", ["users"], |_| async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(CoreError::ModeViolation {
                requested: TransactionMode::ReadWrite,
                mode: TransactionMode::ReadOnly,
                ..
            })
        ));
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn independent_transaction_inside_readonly_commits_on_its_own() {
    let db = &TestDatabase::memory();
    db.transaction("r", ["users"], |outer| async move {
        let inner_id = db
            .transaction("rw!", ["users"], |inner| {
                let outer = outer.clone();
                async move {
                    assert!(inner.parent().is_none());
                    assert!(!inner.shares_native_with(&outer));
                    assert_eq!(outer.pending_continuations(), 1);
                    db.table("users")?.add(user("arne")).await?;
                    Ok(inner.id())
                }
            })
            .await?;
        assert_ne!(inner_id, outer.id());
        assert_eq!(outer.pending_continuations(), 0);
        assert_eq!(db.committed_len("users"), 1);
        assert_eq!(db.table("users")?.count().await?, 1);
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn independent_transaction_survives_outer_abort() {
    let db = &TestDatabase::memory();
    let result = db
        .transaction("rw", ["users"], |outer| async move {
            db.table("users")?.add(user("outer")).await?;
            db.transaction("rw!", ["pets"], |_| async move {
                db.table("pets")?.add(pet("dog")).await
            })
            .await?;
            outer.abort()?;
            Ok::<_, CoreError>(())
        })
        .await;

    assert!(matches!(result, Err(CoreError::AbortRequested { .. })));
    assert_eq!(db.committed_len("users"), 0);
    assert_eq!(db.committed_len("pets"), 1);
}

#[tokio::test]
async fn independent_request_in_aborted_transaction_starts_fresh() {
    let db = &TestDatabase::memory();
    let result = db
        .transaction("rw", ["users"], |outer| async move {
            outer.abort()?;
            db.transaction("rw!", ["users"], |inner| async move {
                assert!(inner.parent().is_none());
                db.table("users")?.add(user("survivor")).await
            })
            .await?;
            Ok::<_, CoreError>(())
        })
        .await;

    assert!(result.unwrap_err().is_abort_requested());
    assert_eq!(db.committed_len("users"), 1);
}

#[tokio::test]
async fn joined_independent_abort_leaves_the_outer_transaction_alone() {
    let db = &TestDatabase::memory();
    db.transaction("rw", ["users"], |outer| async move {
        db.table("users")?.add(user("arne")).await?;
        let detached = db.db.clone();
        let independent = spawn(async move {
            let db = &detached;
            db.transaction("rw!", ["pets"], |inner| async move {
                db.table("pets")?.add(pet("dog")).await?;
                inner.abort()?;
                Ok(())
            })
            .await
        });

        let joined = independent.await;
        assert!(joined.unwrap_err().is_abort_requested());
        assert_ne!(outer.state(), HandleState::Aborted);
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();

    assert_eq!(db.committed_len("users"), 1);
    assert_eq!(db.committed_len("pets"), 0);
}

#[tokio::test]
async fn unhandled_nested_scope_violation_aborts_the_outer_transaction() {
    let db = &TestDatabase::memory();
    let result = db
        .transaction("rw", ["users"], |_| async move {
            db.table("users")?.add(user("arne")).await?;
            db.transaction("rw", ["users", "pets"], |_| async { Ok(()) })
                .await?;
            Ok::<_, CoreError>(())
        })
        .await;

    match result {
        Err(CoreError::ScopeViolation { table, .. }) => assert_eq!(table, "pets"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(db.committed_len("users"), 0);
}

#[tokio::test]
async fn optional_reuse_falls_back_to_independent() {
    let db = &TestDatabase::memory();
    db.transaction("rw", ["users", "pets"], |outer| async move {
        db.transaction("r?", ["users"], |inner| {
            let outer = outer.clone();
            async move {
                assert!(inner.shares_native_with(&outer));
                Ok(())
            }
        })
        .await?;

        db.transaction("rw?", ["petsPerUser"], |inner| {
            let outer = outer.clone();
            async move {
                assert!(inner.parent().is_none());
                assert!(!inner.shares_native_with(&outer));
                db.table("petsPerUser")?
                    .add(json!({ "user": "arne", "pet": 1 }))
                    .await
            }
        })
        .await?;
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
    assert_eq!(db.committed_len("petsPerUser"), 1);
}

#[tokio::test]
async fn scope_request_policy_is_honored() {
    let db = &TestDatabase::memory();
    db.transaction("rw", ["users"], |outer| async move {
        let request = ScopeRequest::new(TransactionMode::ReadWrite, ["users"])
            .with_policy(NestingPolicy::Independent);
        db.transaction_with(request, |inner| {
            let outer = outer.clone();
            async move {
                assert!(!inner.shares_native_with(&outer));
                Ok(())
            }
        })
        .await?;
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn abort_in_innermost_level_aborts_every_level() {
    let db = &TestDatabase::memory();
    let result = db
        .transaction("rw", ["users", "pets"], |_| async move {
            db.table("users")?.add(user("level1")).await?;
            db.transaction("rw", ["users", "pets"], |_| async move {
                db.table("pets")?.add(pet("level2")).await?;
                db.transaction("rw", ["users"], |innermost| async move {
                    db.table("users")?.add(user("level3")).await?;
                    innermost.abort()?;
                    Ok(())
                })
                .await
            })
            .await?;
            Ok::<_, CoreError>(())
        })
        .await;

    assert!(result.unwrap_err().is_abort_requested());
    assert_eq!(db.committed_len("users"), 0);
    assert_eq!(db.committed_len("pets"), 0);
}

#[tokio::test]
async fn caught_nested_failure_still_aborts_the_outer_transaction() {
    let db = &TestDatabase::memory();
    let aborted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&aborted);

    let result = db
        .transaction("rw", ["users"], |outer| async move {
            outer.on_abort(move |_| flag.store(true, Ordering::SeqCst));
            db.table("users")?.add(user("sune")).await?;
            let nested = db
                .transaction("rw", ["users"], |_| async move {
                    db.table("users")?.add(user("sune")).await
                })
                .await;
            assert!(nested.unwrap_err().is_constraint_violation());
            assert_eq!(outer.state(), HandleState::Aborted);
            Ok::<_, CoreError>(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, CoreError::ChildAbortPropagated { .. }));
    assert!(err.is_constraint_violation());
    assert!(aborted.load(Ordering::SeqCst));
    assert_eq!(db.committed_len("users"), 0);
}

#[tokio::test]
async fn sub_transactions_commit_together() {
    let db = &TestDatabase::memory();
    let greeting = db
        .transaction("rw", ALL, |_| async move {
            add_user(db, "user1", &["dog"]).await?;
            add_user(db, "user2", &["cat", "dog"]).await?;

            let detached = db.db.clone();
            let third = spawn(async move { add_user(&detached, "user3", &[]).await });

            db.table("users")?.add(user("user4")).await?;
            db.transaction("rw", ["users"], |_| async move {
                db.table("users")?.add(user("user5")).await
            })
            .await?;

            third.await?;
            Ok::<_, CoreError>(String::from("hello world"))
        })
        .await
        .unwrap();

    assert_eq!(greeting, "hello world");
    assert_eq!(db.committed_len("users"), 5);
    assert_eq!(db.committed_len("pets"), 3);
    assert_eq!(db.committed_len("petsPerUser"), 3);
}

#[tokio::test]
async fn outer_transaction_waits_for_detached_nested_work() {
    let db = &TestDatabase::memory();
    db.transaction("rw", ["users", "pets"], |outer| async move {
        let detached = db.db.clone();
        drop(spawn(async move {
            let db = &detached;
            tokio::task::yield_now().await;
            db.transaction("rw", ["pets"], |_| async move {
                tokio::task::yield_now().await;
                db.table("pets")?.add(pet("dog")).await
            })
            .await
        }));
        assert_eq!(outer.pending_continuations(), 1);
        db.table("users")?.add(user("arne")).await?;
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();

    assert_eq!(db.committed_len("users"), 1);
    assert_eq!(db.committed_len("pets"), 1);
}

#[tokio::test]
async fn nesting_depth_is_limited() {
    let db = &TestDatabase::with_config(Config::new().max_nesting_depth(1));
    db.transaction("rw", ["users"], |_| async move {
        db.transaction("rw", ["users"], |_| async move {
            let result = db.transaction("rw", ["users"], |_| async { Ok(()) }).await;
            assert!(matches!(result, Err(CoreError::NestingTooDeep { depth: 2 })));
            Ok(())
        })
        .await?;
        Ok::<_, CoreError>(())
    })
    .await
    .unwrap();
}
