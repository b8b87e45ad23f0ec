use network_sim::qdisc::QdiscManager;
use network_sim::{apply_link_params, remove_link_params, LinkParams, Namespace};

#[tokio::test]
async fn smoke_apply_and_remove_qdisc() {
    let q = QdiscManager::default();
    if !q.has_net_admin().await {
        eprintln!("skipping: NET_ADMIN not available");
        return;
    }

    // Use a likely-nonexistent iface to test early error path
    let res = apply_link_params(&q, None, "if_not_exist_zzz", &LinkParams::new(1.5, 3.0)).await;
    assert!(res.is_err());

    // A dummy interface inside a scratch namespace exercises the full path
    let ns = match Namespace::ensure("nsim-smoke").await {
        Ok(ns) => ns,
        Err(e) => {
            eprintln!("skipping: cannot create namespace: {}", e);
            return;
        }
    };
    ns.exec_ok("ip", &["link", "add", "dummy0", "type", "dummy"])
        .await
        .expect("dummy link");
    ns.exec_ok("ip", &["link", "set", "dummy0", "up"]).await.expect("up");

    let params = LinkParams::new(1.5, 3.0).with_max_queue(20);
    let res = apply_link_params(&q, Some(ns.name()), "dummy0", &params).await;
    if let Err(e) = &res {
        if e.is_unsupported_qdisc() {
            eprintln!("skipping: kernel lacks tbf/netem: {}", e);
            let _ = ns.delete().await;
            return;
        }
    }
    assert!(res.is_ok(), "apply failed: {:?}", res);

    let backlog = q.backlog_packets(Some(ns.name()), "dummy0").await;
    assert_eq!(backlog.unwrap(), 0);

    let _ = remove_link_params(&q, Some(ns.name()), "dummy0").await;
    let _ = ns.delete().await;
}
