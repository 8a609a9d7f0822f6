use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sandlot::core::broadcast::BroadcastBus;
use sandlot::core::connection::{Connection, ConnectionTable, Outlet};
use sandlot::core::history::MessageHistory;
use sandlot::core::registry::ConnectionRegistry;
use sandlot::core::scene::SceneRegistry;
use sandlot::core::session::SessionId;
use sandlot::scripting::{ScriptConfig, ScriptEngine};
use sandlot::Router;

async fn router() -> Router {
    let bus = Arc::new(BroadcastBus::new(Arc::new(ConnectionTable::new())));
    let scene = Arc::new(SceneRegistry::new(bus));
    let registry = Arc::new(ConnectionRegistry::new(scene.clone()));
    scene.reset(&registry);
    let scripts = ScriptEngine::new(scene, ScriptConfig::default());
    scripts.warm_up().await.unwrap();
    Router::new(registry, Arc::new(MessageHistory::default()), scripts)
}

async fn next(outlet: &mut Outlet) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(10), outlet.frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outlet closed");
    serde_json::from_str(&frame).unwrap()
}

fn pending(outlet: &mut Outlet) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = outlet.frames.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

#[tokio::test]
async fn chat_reaches_everyone_and_eval_errors_reach_only_the_author() {
    let router = router().await;
    let (s1, mut s1_out) = Connection::open(SessionId::generate(), 256);
    let (s2, mut s2_out) = Connection::open(SessionId::generate(), 256);
    router.on_join(&s1);
    router.on_join(&s2);

    // s1: snapshot + own character; then s2's character appears.
    assert_eq!(next(&mut s1_out).await["type"], json!(1));
    assert_eq!(next(&mut s1_out).await["type"], json!(2));
    assert_eq!(next(&mut s1_out).await["type"], json!(3));
    assert_eq!(next(&mut s2_out).await["type"], json!(1));
    assert_eq!(next(&mut s2_out).await["type"], json!(2));

    router.handle_text(s1.session(), r#"{"type":102,"obj":{"text":"hi"}}"#);
    let chat = json!({"type": 7, "obj": {"text": "[user1] hi"}});
    assert_eq!(next(&mut s1_out).await, chat);
    assert_eq!(next(&mut s2_out).await, chat);

    router.handle_text(s1.session(), r#"{"type":100,"obj":{"code":"let x = ;"}}"#);
    let result = next(&mut s1_out).await;
    assert_eq!(result["type"], json!(5));
    assert!(result["obj"].get("console").is_none());
    assert!(!result["obj"]["errors"].as_str().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pending(&mut s2_out).is_empty());
}

#[tokio::test]
async fn every_tab_of_a_session_sees_its_results() {
    let router = router().await;
    let session = SessionId::generate();
    let (tab_a, mut out_a) = Connection::open(session.clone(), 256);
    let (tab_b, mut out_b) = Connection::open(session.clone(), 256);
    router.on_join(&tab_a);
    router.on_join(&tab_b);
    pending(&mut out_a);
    pending(&mut out_b);
    assert_eq!(router.registry().session_count(), 1);

    router.handle_text(tab_b.session(), r#"{"type":100,"obj":{"code":"print(6 * 7);"}}"#);
    let expected = json!({"type": 5, "obj": {"console": "42\n"}});
    assert_eq!(next(&mut out_a).await, expected);
    assert_eq!(next(&mut out_b).await, expected);

    router.on_leave(&tab_a);
    assert!(router.registry().user(&session).is_some());
    router.on_leave(&tab_b);
    assert!(router.registry().user(&session).is_none());
}

#[tokio::test]
async fn scripted_moves_are_broadcast() {
    let router = router().await;
    let (mover, mut mover_out) = Connection::open(SessionId::generate(), 256);
    let (watcher, mut watcher_out) = Connection::open(SessionId::generate(), 256);
    let user = router.on_join(&mover);
    router.on_join(&watcher);
    pending(&mut mover_out);
    pending(&mut watcher_out);

    router.handle_text(
        mover.session(),
        r#"{"type":100,"obj":{"code":"character.move_to(7.5, -2.0);"}}"#,
    );
    let update = next(&mut watcher_out).await;
    assert_eq!(update["type"], json!(6));
    assert_eq!(update["obj"]["id"], json!(user.character_id()));
    assert_eq!(update["obj"]["state"]["x"], json!(7.5));
    assert_eq!(update["obj"]["state"]["z"], json!(-2.0));
}
