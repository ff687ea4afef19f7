// End-to-end gameplay flows against an in-memory store: registration,
// tool download, exploitation, ssh gating, mining and patching, wired the
// same way the server boots them.

use std::sync::Arc;

use termsh_core::catalog;
use termsh_core::exploits::ExploitEngine;
use termsh_core::mining::{self, MiningEngine};
use termsh_core::servers::ServerGraph;
use termsh_core::shops::ShopEngine;
use termsh_core::store::Store;
use termsh_core::tools::ToolRuntime;
use termsh_core::types::Resources;
use termsh_core::users::UserService;
use termsh_core::GameError;

struct World {
    store: Store,
    users: UserService,
    graph: Arc<ServerGraph>,
    tools: Arc<ToolRuntime>,
    exploits: ExploitEngine,
    mining: Arc<MiningEngine>,
    shops: ShopEngine,
}

async fn world() -> World {
    let store = Store::open("sqlite::memory:").await.unwrap();
    catalog::seed(&store, None).await.unwrap();
    let users = UserService::new(store.clone(), "test-secret".to_string());
    let graph = Arc::new(ServerGraph::new(store.clone()));
    let tools = Arc::new(ToolRuntime::new(store.clone()));
    let exploits = ExploitEngine::new(store.clone(), graph.clone(), tools.clone());
    let mining = Arc::new(MiningEngine::new(store.clone(), graph.clone(), tools.clone()));
    let shops = ShopEngine::new(store.clone());
    World { store, users, graph, tools, exploits, mining, shops }
}

#[tokio::test]
async fn new_user_downloads_first_tool() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    assert_eq!(alice.level, 0);
    assert_eq!(alice.resources.cpu, 200);
    assert_eq!(alice.wallet.crypto, 15.0);

    let scan: Vec<String> = w
        .graph
        .list_top_level()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.ip)
        .collect();
    assert!(scan.contains(&"repo".to_string()));
    assert!(scan.contains(&"1.1.1.1".to_string()));
    // nested servers never appear in a root scan
    assert!(!scan.contains(&"172.16.0.2".to_string()));

    let repo = w.graph.get_server_by_ip("repo").await.unwrap();
    let state = w.tools.download(&alice.id, &repo, "password_cracker").await.unwrap();
    assert_eq!(state.version, 1);
    assert!(w.tools.owns(&alice.id, "password_cracker").await.unwrap());
}

#[tokio::test]
async fn exploit_then_ssh_gate() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    let repo = w.graph.get_server_by_ip("repo").await.unwrap();
    w.tools.download(&alice.id, &repo, "password_cracker").await.unwrap();

    assert!(!w.exploits.can_ssh(&alice.id, "1.1.1.1").await.unwrap());

    let outcome = w
        .exploits
        .exploit_server(&alice.id, "1.1.1.1", "password_cracker", "ssh")
        .await
        .unwrap();
    assert_eq!(outcome.xp, 10);

    let rows = w.exploits.exploited(&alice.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].server_path, "1.1.1.1");
    assert_eq!(rows[0].service_name, "ssh");

    assert!(w.exploits.can_ssh(&alice.id, "1.1.1.1").await.unwrap());
    assert_eq!(w.users.get(&alice.id).await.unwrap().experience, 10);

    // access is per-path: the deeper host stays gated
    assert!(!w
        .exploits
        .can_ssh(&alice.id, "4.4.4.4.localNetwork.172.16.0.2")
        .await
        .unwrap());
}

#[tokio::test]
async fn mining_accrues_and_releases() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    let repo = w.graph.get_server_by_ip("repo").await.unwrap();
    w.tools.download(&alice.id, &repo, "crypto_miner").await.unwrap();

    let before = w.graph.get_server_by_ip("1.1.1.1").await.unwrap().used_resources;
    let miner = w.mining.start_mining(&alice.id, "1.1.1.1").await.unwrap();
    assert_eq!(miner.reservation, Resources::new(50, 10.0, 4));
    assert_eq!(w.mining.list_for(&alice.id).await.unwrap().len(), 1);

    // Backdate 5 s and run one tick: reward >= 5 * 0.1 * (1 + 50/100).
    sqlx::query("UPDATE active_miners SET started_at = $1 WHERE id = $2")
        .bind(miner.started_at - 5_000)
        .bind(&miner.id)
        .execute(w.store.pool())
        .await
        .unwrap();
    w.mining.tick().await.unwrap();
    let wallet = w.users.get(&alice.id).await.unwrap().wallet;
    assert!(wallet.crypto >= 15.0 + 5.0 * mining::RATE_PER_SEC * 1.5 - 1e-6);

    w.mining.stop_mining(&alice.id, "1.1.1.1").await.unwrap();
    let after = w.graph.get_server_by_ip("1.1.1.1").await.unwrap().used_resources;
    assert_eq!(after, before);
    assert!(w.mining.list_for(&alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn patch_raises_effective_exploit() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    let repo = w.graph.get_server_by_ip("repo").await.unwrap();
    w.tools.download(&alice.id, &repo, "password_cracker").await.unwrap();

    // Buy the patch at the repo market, then apply it.
    let shop = w.shops.find_shop("repo_market").await.unwrap();
    let items = w.shops.browse(&shop).await.unwrap();
    let idx = items.iter().position(|i| i.name == "pass_patch_v2").unwrap() + 1;
    w.shops.purchase(&alice.id, &shop, idx).await.unwrap();

    let state = w
        .tools
        .apply_patch(&alice.id, "pass_patch_v2", "password_cracker")
        .await
        .unwrap();
    assert_eq!(state.version, 2);
    let effective = w.tools.effective_tool(&alice.id, "password_cracker").await.unwrap();
    let pc = effective
        .exploits()
        .iter()
        .find(|e| e.kind == "password_cracking")
        .unwrap();
    assert_eq!(pc.level, 20);

    assert!(matches!(
        w.tools.apply_patch(&alice.id, "pass_patch_v2", "password_cracker").await,
        Err(GameError::Conflict(_))
    ));
}

#[tokio::test]
async fn shop_tool_purchase_enables_download() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    // Fund the purchase: the advanced kit costs 25 crypto.
    let mut rich = w.users.get(&alice.id).await.unwrap();
    rich.wallet.crypto = 100.0;
    w.store.update_user_wallet(&alice.id, &rich.wallet).await.unwrap();

    let shop = w.shops.find_shop("blackmarket").await.unwrap();
    let items = w.shops.browse(&shop).await.unwrap();
    let idx = items.iter().position(|i| i.name == "advanced_exploit_kit").unwrap() + 1;

    let before = w.graph.get_server_by_ip("2.2.2.2").await.unwrap();
    assert!(!before.listed_tools.contains(&"advanced_exploit_kit".to_string()));

    w.shops.purchase(&alice.id, &shop, idx).await.unwrap();

    let server = w.graph.get_server_by_ip("2.2.2.2").await.unwrap();
    assert!(server.listed_tools.contains(&"advanced_exploit_kit".to_string()));
    w.tools.download(&alice.id, &server, "advanced_exploit_kit").await.unwrap();

    // The kit hits both vulnerable services on 2.2.2.2 in one run.
    let outcomes = w
        .exploits
        .exploit_all_services(&alice.id, "2.2.2.2", "advanced_exploit_kit")
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    // 15 XP per matched vulnerability, two per service here
    let xp: i64 = outcomes.iter().map(|o| o.xp).sum();
    assert_eq!(xp, 60);
}

#[tokio::test]
async fn nested_path_exploitation() {
    let w = world().await;
    let alice = w.users.login_or_register("alice", "pw").await.unwrap();
    let repo = w.graph.get_server_by_ip("repo").await.unwrap();
    w.tools.download(&alice.id, &repo, "ssh_exploit").await.unwrap();
    w.tools.grant_patch(&alice.id, "ssh_patch_v2").await.unwrap();

    let path = "4.4.4.4.localNetwork.172.16.0.2";
    let server = w.graph.resolve_path(path).await.unwrap();
    assert_eq!(server.ip, "172.16.0.2");

    // level 15 tool vs level 19 vuln: rejected until patched to 20
    assert!(w
        .exploits
        .exploit_server(&alice.id, path, "ssh_exploit", "ssh")
        .await
        .is_err());

    w.tools.apply_patch(&alice.id, "ssh_patch_v2", "ssh_exploit").await.unwrap();
    let outcome = w
        .exploits
        .exploit_server(&alice.id, path, "ssh_exploit", "ssh")
        .await
        .unwrap();
    assert_eq!(outcome.matched.len(), 1);
    assert!(w.exploits.can_ssh(&alice.id, path).await.unwrap());
}
