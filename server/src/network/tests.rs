//! End-to-end API flows against the in-memory store.

use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use super::api::{dispatch, ApiRequest, AppState};
use crate::auth::TokenService;
use crate::persistence::MemoryStore;

fn test_state() -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), TokenService::new("test-secret", 30))
}

async fn send(
    state: &AppState,
    method: Method,
    uri: &str,
    token: Option<&str>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Value) {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    };

    let mut headers = headers;
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
    }

    let response = dispatch(state, ApiRequest::new(method, path, query, headers, body)).await;
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn call(
    state: &AppState,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut headers = HeaderMap::new();
    let body = match body {
        Some(value) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Bytes::from(serde_json::to_vec(&value).unwrap())
        }
        None => Bytes::new(),
    };
    send(state, method, uri, token, headers, body).await
}

async fn sign_up(state: &AppState, username: &str) -> String {
    let credentials = json!({"username": username, "password": "correct horse"});
    let (status, _) = call(state, Method::POST, "/register", None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(state, Method::POST, "/token", None, Some(credentials)).await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

fn hero(name: &str, class_id: i64) -> Value {
    json!({
        "name": name,
        "character_class_id": class_id,
        "level": 1,
        "max_hp": 10,
        "current_hp": 10,
        "armor_class": 10,
        "strength": 10,
        "dexterity": 10,
        "constitution": 10,
        "intelligence": 10,
        "wisdom": 10,
        "charisma": 10
    })
}

async fn create_class(state: &AppState, token: &str, name: &str) -> i64 {
    let (status, body) = call(
        state,
        Method::POST,
        "/character_classes/",
        Some(token),
        Some(json!({"name": name, "description": "test class"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_i64().unwrap()
}

// =============================================================================
// Accounts
// =============================================================================

#[tokio::test]
async fn test_register_login_and_me() {
    let state = test_state();
    let token = sign_up(&state, "alice").await;

    let (status, body) = call(&state, Method::GET, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let state = test_state();
    sign_up(&state, "alice").await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/register",
        None,
        Some(json!({"username": "alice", "password": "another"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Username already registered");
}

#[tokio::test]
async fn test_bad_credentials_are_indistinguishable() {
    let state = test_state();
    sign_up(&state, "alice").await;

    let (wrong_status, wrong_body) = call(
        &state,
        Method::POST,
        "/token",
        None,
        Some(json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    let (unknown_status, unknown_body) = call(
        &state,
        Method::POST,
        "/token",
        None,
        Some(json!({"username": "nobody", "password": "wrong"})),
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
}

#[tokio::test]
async fn test_form_login() {
    let state = test_state();
    sign_up(&state, "bob").await;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    let body = Bytes::from_static(b"username=bob&password=correct+horse");
    let (status, body) = send(&state, Method::POST, "/token", None, headers, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let state = test_state();

    let (status, _) = call(&state, Method::GET, "/characters/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&state, Method::GET, "/users/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &state,
        Method::POST,
        "/character_classes/",
        None,
        Some(json!({"name": "Rogue"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Catalog reads stay public
    let (status, body) = call(&state, Method::GET, "/character_classes/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_unknown_route() {
    let state = test_state();
    let (status, _) = call(&state, Method::GET, "/dragons/", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Characters
// =============================================================================

#[tokio::test]
async fn test_local_ids_and_ownership() {
    let state = test_state();
    let alice = sign_up(&state, "alice").await;
    let bob = sign_up(&state, "bob").await;
    let class_id = create_class(&state, &alice, "Fighter").await;

    for name in ["First", "Second"] {
        let (status, _) = call(&state, Method::POST, "/characters/", Some(&alice), Some(hero(name, class_id))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = call(&state, Method::POST, "/characters/", Some(&bob), Some(hero("Bobby", class_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["local_id"], 1);
    assert_eq!(body["character_class"]["name"], "Fighter");

    let (_, list) = call(&state, Method::GET, "/characters/", Some(&alice), None).await;
    let local_ids: Vec<i64> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["local_id"].as_i64().unwrap())
        .collect();
    assert_eq!(local_ids, vec![1, 2]);

    // Bob only has local id 1; Alice's second character is invisible to him
    let (status, _) = call(&state, Method::GET, "/characters/2", Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&state, Method::DELETE, "/characters/2", Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, helmet) = call(
        &state,
        Method::POST,
        "/equipment/",
        Some(&alice),
        Some(json!({"name": "Helmet", "cost": 10, "effects": {"armor_class": 1}})),
    )
    .await;
    let (status, _) = call(
        &state,
        Method::POST,
        "/characters/2/equipment/",
        Some(&alice),
        Some(json!({"equipment_id": helmet["id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Nothing Bob sends can reach or change Alice's second character
    let mut renamed = hero("Stolen", class_id);
    renamed["strength"] = json!(18);
    let equip_uri = format!("/characters/2/equipment/{}/equip", helmet["id"]);
    let attempts = [
        (Method::PUT, "/characters/2".to_string(), Some(renamed)),
        (Method::POST, "/characters/2/level_up".to_string(), None),
        (Method::PATCH, "/characters/2/set_level?new_level=5".to_string(), None),
        (Method::GET, "/characters/2/effective_stats/".to_string(), None),
        (Method::PATCH, equip_uri, None),
    ];
    for (method, uri, body) in attempts {
        let (status, _) = call(&state, method.clone(), &uri, Some(&bob), body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }

    let (status, body) = call(&state, Method::GET, "/characters/2", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Second");
    assert_eq!(body["level"], 1);
    assert_eq!(body["strength"], 10);
    assert_eq!(body["equipment"][0]["is_equipped"], false);

    let (status, _) = call(&state, Method::DELETE, "/characters/1", Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&state, Method::GET, "/characters/1", Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_keeps_local_id() {
    let state = test_state();
    let token = sign_up(&state, "alice").await;
    let class_id = create_class(&state, &token, "Fighter").await;
    call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Before", class_id))).await;

    let mut body = hero("After", class_id);
    body["local_id"] = json!(99);
    body["strength"] = json!(18);
    let (status, updated) = call(&state, Method::PUT, "/characters/1", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["local_id"], 1);
    assert_eq!(updated["name"], "After");
    assert_eq!(updated["strength"], 18);
}

#[tokio::test]
async fn test_character_validation() {
    let state = test_state();
    let token = sign_up(&state, "alice").await;
    let class_id = create_class(&state, &token, "Fighter").await;

    let mut too_strong = hero("Hulk", class_id);
    too_strong["strength"] = json!(31);
    let (status, _) = call(&state, Method::POST, "/characters/", Some(&token), Some(too_strong)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&state, Method::POST, "/characters/", Some(&token), Some(json!({"name": "Incomplete"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Classless", 999))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_class_in_use_cannot_be_deleted() {
    let state = test_state();
    let token = sign_up(&state, "alice").await;
    let class_id = create_class(&state, &token, "Fighter").await;
    call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Hero", class_id))).await;

    let uri = format!("/character_classes/{}", class_id);
    let (status, _) = call(&state, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    call(&state, Method::DELETE, "/characters/1", Some(&token), None).await;
    let (status, _) = call(&state, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// =============================================================================
// Progression
// =============================================================================

#[tokio::test]
async fn test_level_up_grants_fireball() {
    let state = test_state();
    let token = sign_up(&state, "merlin").await;
    let class_id = create_class(&state, &token, "Sorcerer").await;

    let (_, fireball) = call(
        &state,
        Method::POST,
        "/abilities/",
        Some(&token),
        Some(json!({"name": "Fireball", "uses": 3, "available_classes": "sorcerer"})),
    )
    .await;
    let fireball_id = fireball["id"].as_i64().unwrap();

    let (status, rule) = call(
        &state,
        Method::POST,
        "/class_progression/",
        Some(&token),
        Some(json!({"character_class_id": class_id, "level": 2, "hp_bonus": 4, "abilities": [fireball_id]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["abilities"], json!([fireball_id]));

    call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Apprentice", class_id))).await;

    let (status, body) = call(&state, Method::POST, "/characters/1/level_up", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 2);
    let abilities = body["abilities"].as_array().unwrap();
    assert_eq!(abilities.len(), 1);
    assert_eq!(abilities[0]["name"], "Fireball");
    assert_eq!(abilities[0]["current_uses"], 3);

    // Same level again changes nothing
    let (_, again) = call(&state, Method::PATCH, "/characters/1/set_level?new_level=2", Some(&token), None).await;
    assert_eq!(again["abilities"].as_array().unwrap().len(), 1);

    let (status, body) = call(&state, Method::PATCH, "/characters/1/set_level?new_level=1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 1);
    assert_eq!(body["abilities"], json!([]));

    let (status, _) = call(&state, Method::PATCH, "/characters/1/set_level?new_level=0", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&state, Method::POST, "/characters/7/level_up", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &state,
        Method::PATCH,
        "/characters/1/set_level",
        Some(&token),
        Some(json!({"new_level": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 3);
}

#[tokio::test]
async fn test_progression_rule_management() {
    let state = test_state();
    let token = sign_up(&state, "admin").await;
    let class_id = create_class(&state, &token, "Cleric").await;
    let (_, heal) = call(&state, Method::POST, "/abilities/", Some(&token), Some(json!({"name": "Heal"}))).await;
    let heal_id = heal["id"].as_i64().unwrap();
    assert_eq!(heal["uses"], -1);

    let rule_body = json!({"character_class_id": class_id, "level": 1});
    let (_, rule) = call(&state, Method::POST, "/class_progression/", Some(&token), Some(rule_body.clone())).await;
    let rule_id = rule["id"].as_i64().unwrap();

    let (status, _) = call(&state, Method::POST, "/class_progression/", Some(&token), Some(rule_body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let add_uri = format!("/class_progression/{}/add_ability/{}", rule_id, heal_id);
    let (status, rule) = call(&state, Method::POST, &add_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["abilities"], json!([heal_id]));

    let (status, _) = call(&state, Method::POST, &add_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let remove_uri = format!("/class_progression/{}/remove_ability/{}", rule_id, heal_id);
    let (status, _) = call(&state, Method::DELETE, &remove_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&state, Method::DELETE, &remove_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let rule_uri = format!("/class_progression/{}", rule_id);
    let (status, fetched) = call(&state, Method::GET, &rule_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["abilities"], json!([]));

    let (status, _) = call(&state, Method::DELETE, &rule_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&state, Method::GET, &rule_uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Abilities, equipment and effective stats
// =============================================================================

#[tokio::test]
async fn test_manual_ability_conflict() {
    let state = test_state();
    let token = sign_up(&state, "alice").await;
    let class_id = create_class(&state, &token, "Rogue").await;
    call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Shade", class_id))).await;
    let (_, sneak) = call(&state, Method::POST, "/abilities/", Some(&token), Some(json!({"name": "Sneak", "uses": 2}))).await;
    let body = json!({"ability_id": sneak["id"]});

    let negative = json!({"ability_id": sneak["id"], "current_uses": -5});
    let (status, _) = call(&state, Method::POST, "/characters/1/abilities/", Some(&token), Some(negative)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, learned) = call(&state, Method::POST, "/characters/1/abilities/", Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(learned["current_uses"], 2);

    let (status, conflict) = call(&state, Method::POST, "/characters/1/abilities/", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(conflict["detail"], "This character already has this ability");

    let uri = format!("/characters/1/abilities/{}", sneak["id"]);
    let (status, _) = call(&state, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = call(&state, Method::GET, "/characters/1/abilities/", Some(&token), None).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn test_equip_changes_effective_stats() {
    let state = test_state();
    let token = sign_up(&state, "gimli").await;
    let class_id = create_class(&state, &token, "Fighter").await;
    call(&state, Method::POST, "/characters/", Some(&token), Some(hero("Axe", class_id))).await;

    let (_, belt) = call(
        &state,
        Method::POST,
        "/equipment/",
        Some(&token),
        Some(json!({"name": "Belt of Strength", "cost": 100, "effects": {"strength": 2}})),
    )
    .await;
    let (_, chainmail) = call(
        &state,
        Method::POST,
        "/equipment/",
        Some(&token),
        Some(json!({"name": "Chainmail", "cost": 50, "effects": "{\"armor_class\": 5}"})),
    )
    .await;
    assert_eq!(chainmail["effects"], json!({"armor_class": 5}));

    for item in [&belt, &chainmail] {
        let (status, owned) = call(
            &state,
            Method::POST,
            "/characters/1/equipment/",
            Some(&token),
            Some(json!({"equipment_id": item["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(owned["is_equipped"], false);
    }

    let (_, stats) = call(&state, Method::GET, "/characters/1/effective_stats/", Some(&token), None).await;
    assert_eq!(stats["strength"], 10);
    assert_eq!(stats["armor_class"], 10);

    for item in [&belt, &chainmail] {
        let uri = format!("/characters/1/equipment/{}/equip", item["id"]);
        let (status, owned) = call(&state, Method::PATCH, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(owned["is_equipped"], true);
    }

    let (_, stats) = call(&state, Method::GET, "/characters/1/effective_stats/", Some(&token), None).await;
    assert_eq!(stats["strength"], 12);
    assert_eq!(stats["armor_class"], 15);
    assert_eq!(stats.as_object().unwrap().len(), 9);

    let uri = format!("/characters/1/equipment/{}/unequip", belt["id"]);
    call(&state, Method::PATCH, &uri, Some(&token), None).await;

    let (_, stats) = call(&state, Method::GET, "/characters/1/effective_stats/", Some(&token), None).await;
    assert_eq!(stats["strength"], 10);

    let (_, equipped) = call(&state, Method::GET, "/characters/1/equipment/equipped/", Some(&token), None).await;
    let names: Vec<&str> = equipped
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Chainmail"]);

    let (_, all) = call(&state, Method::GET, "/characters/1/equipment/", Some(&token), None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    // Base stats are never modified
    let (_, sheet) = call(&state, Method::GET, "/characters/1", Some(&token), None).await;
    assert_eq!(sheet["armor_class"], 10);

    let uri = format!("/characters/1/equipment/{}", chainmail["id"]);
    let (status, _) = call(&state, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&state, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
