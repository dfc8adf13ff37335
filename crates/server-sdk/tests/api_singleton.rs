//! Process-wide entry points.  Kept to a single test because they share
//! one global instance.

mod common;

use common::{always_ok, fast_settings, server_params, start};
use gl_server_sdk::{api, GameLiftError, ProcessParameters, ServerParameters};

#[tokio::test]
async fn init_destroy_lifecycle() {
    assert_eq!(api::get_sdk_version(), "5.3.0");
    assert_eq!(
        api::get_game_session_id().unwrap_err(),
        GameLiftError::NotInitialized
    );
    assert_eq!(api::destroy().unwrap_err(), GameLiftError::NotInitialized);

    // A failed init leaves nothing registered.
    let err = api::init_sdk_with_settings(ServerParameters::new(), fast_settings())
        .await
        .unwrap_err();
    assert!(matches!(err, GameLiftError::Unauthorized(_)), "{err:?}");
    assert_eq!(
        api::get_termination_time().unwrap_err(),
        GameLiftError::NotInitialized
    );

    let mut plane = start(always_ok()).await;
    api::init_sdk_with_settings(server_params(&plane.url), fast_settings())
        .await
        .unwrap();
    assert_eq!(
        api::init_sdk_with_settings(server_params(&plane.url), fast_settings())
            .await
            .unwrap_err(),
        GameLiftError::AlreadyInitialized
    );

    api::process_ready(ProcessParameters::new(7777)).await.unwrap();
    plane.next_frame("ActivateServerProcess").await;
    assert_eq!(
        api::get_game_session_id().unwrap_err(),
        GameLiftError::GameSessionIdNotSet
    );
    assert_eq!(api::get_termination_time().unwrap(), None);

    api::process_ending().await.unwrap();
    plane.next_frame("TerminateServerProcess").await;
    api::destroy().unwrap();
    assert_eq!(
        api::process_ending().await.unwrap_err(),
        GameLiftError::NotInitialized
    );

    // A fresh init works after destroy.
    api::init_sdk_with_settings(server_params(&plane.url), fast_settings())
        .await
        .unwrap();
    api::destroy().unwrap();
}
