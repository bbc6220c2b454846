//! End-to-end tests against a mock heartbeat agent over loopback UDP.

#[cfg(test)]
mod cluster_hbs_tests {
    use assert_matches::assert_matches;
    use serial_test::serial;
    use sm_cluster_hbs::constants::{HEADER_SIZE, RECORD_SIZE};
    use sm_cluster_hbs::{
        ClientConfig, ClusterHbsClient, ClusterHbsState, ClusterMessage, Error, HistoryEntry,
        HistoryRecord, IntervalScheduler, StaticHostname, TokioReactor,
    };
    use sm_cluster_hbs_mock::{MockHbsAgent, allocate_port};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(5);

    fn record(controller: u8, network: u8, enabled: u16, responding: u16) -> HistoryRecord {
        let mut record = HistoryRecord {
            controller,
            network,
            entries: 2,
            oldest_entry_index: 14,
            storage0_responding: true,
            ..HistoryRecord::default()
        };
        record.entry[0] = HistoryEntry {
            hosts_enabled: enabled,
            hosts_responding: responding,
        };
        record
    }

    fn two_controller_message() -> ClusterMessage {
        ClusterMessage::new(
            true,
            vec![
                record(0, 0, 6, 5),
                record(0, 1, 6, 6),
                record(1, 0, 6, 4),
                record(1, 1, 6, 3),
            ],
        )
    }

    fn start_client(config: &ClientConfig, hostname: &str) -> Arc<ClusterHbsClient> {
        ClusterHbsClient::initialize(
            config,
            StaticHostname(hostname.to_string()),
            &TokioReactor::new().unwrap(),
            &IntervalScheduler::new().unwrap(),
        )
        .unwrap()
    }

    async fn wait_for_state(client: &ClusterHbsClient) -> ClusterHbsState {
        timeout(WAIT, async {
            loop {
                let state = client.current_state();
                if state.is_populated() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_query_state_round_trip() {
        let agent = MockHbsAgent::start().await.unwrap();
        agent.set_response(two_controller_message());
        let config = ClientConfig::new(agent.port(), 0).with_pulse_interval(Duration::from_secs(60));
        let client = start_client(&config, "controller-0");

        let state = timeout(WAIT, client.query_state()).await.unwrap().unwrap();

        assert!(state.storage0_provisioned);
        assert_eq!(state.controllers[0].nodes_reachable, 6);
        assert_eq!(state.controllers[0].nodes_enabled, 6);
        assert_eq!(state.controllers[1].nodes_reachable, 4);
        assert!(state.controllers[1].storage0_responding);
        assert_eq!(client.this_controller_index(), 0);
        assert_eq!(client.peer_controller_index(), 1);

        let queries = agent.queries();
        let data = queries.iter().find(|q| !q.is_alive_pulse()).unwrap();
        assert_eq!(data.service, "heartbeat");
        assert_eq!(data.request, "cluster_info");

        let report = client.report().to_string();
        assert!(report.contains("Current state, last updated"));
        assert!(!report.contains("Previous state"));

        client.finalize();
    }

    #[tokio::test]
    #[traced_test]
    #[serial]
    async fn test_alive_pulses_from_configured_port() {
        let agent = MockHbsAgent::start().await.unwrap();
        let client_port = allocate_port();
        let config =
            ClientConfig::new(agent.port(), client_port).with_pulse_interval(Duration::from_millis(20));
        let client = start_client(&config, "controller-1");

        agent.wait_for_queries(3, WAIT).await.unwrap();
        assert!(agent.alive_pulses() >= 3);
        assert_eq!(agent.last_peer().map(|a| a.port()), Some(client_port));

        // Pulses never produce responses, so nothing is ever applied.
        assert!(!client.current_state().is_populated());
        assert_eq!(client.pending_callbacks(), 0);

        client.finalize();
        // The configured port is released as soon as finalize returns.
        let rebound = std::net::UdpSocket::bind(("127.0.0.1", client_port));
        assert!(rebound.is_ok(), "client port still bound: {rebound:?}");
        drop(rebound);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = agent.queries().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(agent.queries().len(), seen);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unsolicited_message_updates_state() {
        let agent = MockHbsAgent::start().await.unwrap();
        let config = ClientConfig::new(agent.port(), 0).with_pulse_interval(Duration::from_secs(60));
        let client = start_client(&config, "controller-0");

        agent
            .push(client.local_addr(), &two_controller_message())
            .await
            .unwrap();
        let first = wait_for_state(&client).await;
        assert_eq!(first.controllers[1].nodes_reachable, 4);
        assert!(!client.previous_state().is_populated());

        agent
            .push(
                client.local_addr(),
                &ClusterMessage::new(false, vec![record(1, 0, 7, 7)]),
            )
            .await
            .unwrap();
        timeout(WAIT, async {
            while !client.previous_state().is_populated() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(client.previous_state(), first);
        assert!(!client.current_state().storage0_provisioned);
        assert_eq!(client.current_state().controllers[1].nodes_reachable, 7);
        assert!(client.report().to_string().contains("Previous state, since"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_push_is_ignored() {
        let agent = MockHbsAgent::start().await.unwrap();
        agent.set_silent(true);
        let config = ClientConfig::new(agent.port(), 0).with_pulse_interval(Duration::from_secs(60));
        let client = start_client(&config, "controller-0");

        let pending = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.query_state().await }
        });
        agent.wait_for_queries(2, WAIT).await.unwrap();

        let full = two_controller_message().encode();
        agent
            .push_raw(client.local_addr(), &full[..HEADER_SIZE + RECORD_SIZE])
            .await
            .unwrap();
        agent.push_raw(client.local_addr(), &[0u8; 4]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!pending.is_finished());
        assert_eq!(client.pending_callbacks(), 1);
        assert!(!client.current_state().is_populated());

        agent.push_raw(client.local_addr(), &full).await.unwrap();
        let state = timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
        assert_eq!(state.controllers[0].nodes_reachable, 6);
        assert_eq!(client.pending_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_finalize_fails_waiting_queries() {
        let agent = MockHbsAgent::start().await.unwrap();
        agent.set_silent(true);
        let config = ClientConfig::new(agent.port(), 0).with_pulse_interval(Duration::from_secs(60));
        let client = start_client(&config, "controller-0");

        let pending = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.query_state().await }
        });
        agent.wait_for_queries(2, WAIT).await.unwrap();

        client.finalize();
        let result = timeout(WAIT, pending).await.unwrap().unwrap();
        assert_matches!(result, Err(Error::Closed));
        assert_matches!(client.query(Some(Box::new(|| {}))), Err(Error::Closed));
    }

    #[tokio::test]
    async fn test_zero_pulse_interval_fails_initialize() {
        let agent = MockHbsAgent::start().await.unwrap();
        let config = ClientConfig::new(agent.port(), 0).with_pulse_interval(Duration::ZERO);

        let err = ClusterHbsClient::initialize(
            &config,
            StaticHostname("controller-0".to_string()),
            &TokioReactor::new().unwrap(),
            &IntervalScheduler::new().unwrap(),
        )
        .unwrap_err();
        assert_matches!(err, Error::Register(_));
    }

    #[tokio::test]
    #[traced_test]
    #[serial]
    async fn test_reinitialize_on_same_port_after_finalize() {
        let agent = MockHbsAgent::start().await.unwrap();
        agent.set_response(two_controller_message());
        let config = ClientConfig::new(agent.port(), allocate_port())
            .with_pulse_interval(Duration::from_secs(60));

        let first = start_client(&config, "controller-0");
        timeout(WAIT, first.query_state()).await.unwrap().unwrap();
        first.finalize();

        // Datagrams sent to the old client after finalize are never applied.
        let stale = ClusterMessage::new(false, vec![record(1, 0, 9, 9)]);
        agent.push(first.local_addr(), &stale).await.unwrap();

        let second = start_client(&config, "controller-0");
        assert_eq!(second.local_addr(), first.local_addr());
        let state = timeout(WAIT, second.query_state()).await.unwrap().unwrap();
        assert_eq!(state.controllers[1].nodes_reachable, 4);
        assert_eq!(first.current_state().controllers[1].nodes_reachable, 4);
        second.finalize();
    }
}
