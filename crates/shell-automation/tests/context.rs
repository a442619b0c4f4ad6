//! Context ownership and teardown

use std::sync::{Arc, Mutex};

use shell_automation::{Context, EngineConfig};
use shell_executor::{ExecutionOptions, ManagedCommand, MockConnector, SessionRequest, Target};

fn request(url: &str) -> SessionRequest {
    SessionRequest::new(Target::parse(url).unwrap())
}

#[smol_potat::test]
async fn test_close_releases_sessions_then_cleanups_lifo() {
    let mock = MockConnector::new();
    let mut context = Context::new(Arc::new(mock.clone()), Arc::new(EngineConfig::default()));
    let order = Arc::new(Mutex::new(Vec::new()));

    context.open_session(&request("ssh://a@web01")).await.unwrap();
    context.open_session(&request("ssh://b@web02")).await.unwrap();
    context.open_session(&request("ssh://c@web03").transient()).await.unwrap();
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        context.defer(move || order.lock().unwrap().push(name));
    }

    context.close().await.unwrap();
    assert!(context.is_closed());
    assert_eq!(mock.closed(), ["b@web02:22", "a@web01:22"]);
    assert_eq!(*order.lock().unwrap(), ["second", "first"]);

    context.close().await.unwrap();
    assert_eq!(mock.closed().len(), 2);
}

#[test]
fn test_contexts_do_not_share_sessions_or_state() -> anyhow::Result<()> {
    futures::executor::block_on(async {
        let mock = MockConnector::new().respond("hostname", "web01");
        let config = Arc::new(EngineConfig::default());
        let mut first = Context::new(Arc::new(mock.clone()), Arc::clone(&config));
        let mut second = Context::new(Arc::new(mock.clone()), config);
        assert_ne!(first.id(), second.id());

        let command = ManagedCommand::from_commands(ExecutionOptions::new(), ["hostname"]);
        first.run(&request("ssh://a@web01"), &command, false).await?;
        first.run(&request("ssh://a@web01"), &command, false).await?;
        second.run(&request("ssh://a@web01"), &command, false).await?;
        first.state_mut().set("only.first", true);

        assert_eq!(mock.connections().len(), 2);
        assert_eq!(mock.count("sw_vers"), 2);
        assert!(!second.state().contains("only.first"));

        first.close().await?;
        second.close().await?;
        Ok(())
    })
}
