//! Control-channel sessions over real loopback sockets.

mod common;

#[tokio::test]
async fn greeting_comes_from_address_fragment() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fragment(dir.path(), "127.0.0.1.toml", &common::fragment("dyn.example", &[]));
    let config = common::daemon_config(dir.path(), "%0.toml");
    let (addr, _server, shutdown) = common::start_server(&config).await;

    let mut client = common::ControlClient::connect(addr).await;
    assert_eq!(client.reply().await, "220 Welcome to dyn.example");
    assert_eq!(client.command("QUIT").await, "221 Goodbye.");

    shutdown.trigger();
}

#[tokio::test]
async fn greeting_falls_back_to_primary() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::daemon_config(dir.path(), "%n.toml");
    let (addr, _server, shutdown) = common::start_server(&config).await;

    let mut client = common::ControlClient::connect(addr).await;
    assert_eq!(client.reply().await, "220 primary.example ready");

    let feat = client.command("FEAT").await;
    assert_eq!(feat, "211 End");

    shutdown.trigger();
}

#[tokio::test]
async fn host_command_switches_identity() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fragment(dir.path(), "a.example.toml", &common::fragment("a.example", &["ftp.a.example"]));
    let config = common::daemon_config(dir.path(), "%n.toml");
    let (addr, server, shutdown) = common::start_server(&config).await;

    let mut client = common::ControlClient::connect(addr).await;
    client.reply().await;

    assert_eq!(
        client.command("HOST a.example").await,
        "220 HOST command successful, now serving a.example"
    );
    assert_eq!(
        client.command("HOST unknown.example").await,
        "504 Unknown virtual host 'unknown.example'"
    );

    let state = server.engine().state();
    let binding = state.table().find_binding(addr.ip(), addr.port()).unwrap();
    assert_eq!(binding.server().name, "a.example");

    // A second client reaches the dynamic identity directly.
    let mut other = common::ControlClient::connect(addr).await;
    assert_eq!(other.reply().await, "220 Welcome to a.example");

    shutdown.trigger();
}

#[tokio::test]
async fn shutdown_closes_idle_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::daemon_config(dir.path(), "%n.toml");
    let (addr, server, shutdown) = common::start_server(&config).await;

    let mut client = common::ControlClient::connect(addr).await;
    client.reply().await;
    assert_eq!(server.tracker().active_count(), 1);

    shutdown.trigger();
    assert!(client.reply().await.starts_with("421 "));
    assert!(server
        .tracker()
        .wait_for_drain(std::time::Duration::from_secs(5))
        .await);
}

#[tokio::test]
async fn host_rejects_names_that_are_not_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let vhosts = dir.path().join("vhosts");
    common::write_fragment(&vhosts, "a.example.toml", &common::fragment("a.example", &[]));
    common::write_fragment(dir.path(), "outside.toml", &common::fragment("outside.example", &[]));
    let config = common::daemon_config(&vhosts, "%n.toml");
    let (addr, server, shutdown) = common::start_server(&config).await;

    let mut client = common::ControlClient::connect(addr).await;
    client.reply().await;
    assert_eq!(
        client.command("HOST ../outside").await,
        "501 Invalid host name '../outside'"
    );
    assert_eq!(client.command("HOST .hidden").await, "501 Invalid host name '.hidden'");

    let state = server.engine().state();
    let bound = state.table().find_binding(addr.ip(), addr.port()).unwrap().server();
    assert_eq!(bound.name, "primary.example");
    assert!(bound.source.is_none());

    let mut other = common::ControlClient::connect(addr).await;
    assert_eq!(other.reply().await, "220 primary.example ready");

    shutdown.trigger();
}

#[tokio::test]
async fn tls_server_name_selects_identity() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fragment(dir.path(), "a.example.toml", &common::fragment("a.example", &[]));
    let (acceptor, cert) = common::self_signed(dir.path(), "a.example");
    let config = common::daemon_config(dir.path(), "%n.toml");
    let (addr, server, shutdown) = common::start_server_with_tls(&config, Some(acceptor)).await;

    let mut client = common::ControlClient::connect(addr).await;
    assert_eq!(client.reply().await, "220 primary.example ready");
    assert_eq!(client.command("FEAT").await, "211 End");

    let mut secured = client.start_tls("a.example", cert).await;
    assert_eq!(secured.command("NOOP").await, "200 NOOP command successful");

    let state = server.engine().state();
    let bound = state.table().find_binding(addr.ip(), addr.port()).unwrap().server();
    assert_eq!(bound.name, "a.example");
    assert_eq!(bound.source.as_deref(), Some(dir.path().join("a.example.toml").as_path()));

    assert_eq!(
        secured.command("HOST a.example").await,
        "503 HOST not allowed after security exchange"
    );
    assert_eq!(secured.command("AUTH TLS").await, "503 Already secured");

    let mut other = common::ControlClient::connect(addr).await;
    assert_eq!(other.reply().await, "220 Welcome to a.example");

    shutdown.trigger();
}

#[tokio::test]
async fn full_identity_refuses_host_switch() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fragment(
        dir.path(),
        "a.example.toml",
        "[server]\nname = \"a.example\"\nmax_clients = 1\n",
    );
    let config = common::daemon_config(dir.path(), "%n.toml");
    let (addr, server, shutdown) = common::start_server(&config).await;

    let mut first = common::ControlClient::connect(addr).await;
    first.reply().await;
    assert_eq!(
        first.command("HOST a.example").await,
        "220 HOST command successful, now serving a.example"
    );
    assert_eq!(server.limits().active("a.example"), 1);
    assert_eq!(server.limits().active("primary.example"), 0);

    let mut second = common::ControlClient::connect(addr).await;
    assert_eq!(
        second.reply().await,
        "421 Too many clients for a.example, closing control connection"
    );

    assert_eq!(first.command("QUIT").await, "221 Goodbye.");
    shutdown.trigger();
}
