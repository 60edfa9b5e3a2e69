//! End-to-end flow tests.
//!
//! Each test stands up the whole stack — store, betting service,
//! settlement engine, round service, bot — over an in-memory database,
//! drives it through a realistic round, and checks the money: balances,
//! wager statuses, and the ledger replay invariant for every account.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::SqlitePool;
use std::sync::Arc;

use punt::betting::BettingService;
use punt::events::{MemorySink, BANKROLL_UPDATE};
use punt::feeds::{self, FeedStatus};
use punt::ledger;
use punt::rounds::RoundService;
use punt::settlement::SettlementEngine;
use punt::store;
use punt::types::{ChangeKind, MarketStatus, Round, WagerStatus};

use crate::mock_feeds::ScriptedFeed;

struct Harness {
    pool: SqlitePool,
    betting: BettingService,
    engine: SettlementEngine,
    rounds: RoundService,
    sink: Arc<MemorySink>,
    feed: ScriptedFeed,
    round: Round,
}

async fn harness() -> Harness {
    let pool = store::memory_pool().await.unwrap();
    store::init_schema(&pool).await.unwrap();

    let sink = Arc::new(MemorySink::new());
    let now = Utc::now();
    let round = {
        let mut conn = pool.acquire().await.unwrap();
        store::insert_round(&mut conn, 18, 2025, now - Duration::hours(1), now + Duration::days(7))
            .await
            .unwrap()
    };

    Harness {
        betting: BettingService::new(pool.clone()),
        engine: SettlementEngine::new(pool.clone(), sink.clone()),
        rounds: RoundService::new(pool.clone(), sink.clone(), dec!(1000.00)),
        sink,
        feed: ScriptedFeed::new(),
        round,
        pool,
    }
}

impl Harness {
    async fn add_market(&self, home: &str, away: &str, hours_from_now: i64) -> i64 {
        let mut conn = self.pool.acquire().await.unwrap();
        store::insert_market(
            &mut conn,
            self.round.round_id,
            None,
            home,
            away,
            Utc::now() + Duration::hours(hours_from_now),
        )
        .await
        .unwrap()
        .market_id
    }

    async fn add_account(&self, username: &str, bankroll: Decimal) -> i64 {
        store::create_account(&self.pool, username, bankroll, false)
            .await
            .unwrap()
            .account_id
    }

    async fn bankroll_of(&self, account_id: i64) -> Decimal {
        let mut conn = self.pool.acquire().await.unwrap();
        store::get_account(&mut conn, account_id)
            .await
            .unwrap()
            .unwrap()
            .bankroll
    }

    async fn assert_ledger_consistent(&self, account_id: i64) {
        let mut conn = self.pool.acquire().await.unwrap();
        let report = ledger::verify_account(&mut conn, account_id).await.unwrap();
        assert!(report.is_consistent(), "ledger drift for account {account_id}: {report}");
    }

    /// Start the match, then mark it finished with the given score.
    async fn kick_off(&self, market_id: i64) {
        let mut conn = self.pool.acquire().await.unwrap();
        sqlx::query("UPDATE markets SET start_time = ? WHERE market_id = ?")
            .bind((Utc::now() - Duration::hours(2)).to_rfc3339())
            .bind(market_id)
            .execute(&mut *conn)
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// The canonical flow
// ---------------------------------------------------------------------------

/// Bankroll 1000, stake 100 on home at 1.90, home wins 24-12:
/// 1000 -> 900 -> 1090, wager Won, placement + win ledger entries.
#[tokio::test]
async fn test_place_and_settle_home_win() {
    let h = harness().await;
    let market_id = h.add_market("Broncos", "Cowboys", 48).await;
    let alice = h.add_account("alice", dec!(1000.00)).await;

    // Odds arrive from the feed while the market is open.
    h.feed.set_odds("Broncos", "Cowboys", dec!(1.90), dec!(2.10));
    let updated = feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();
    assert_eq!(updated, 1);

    let wager = h
        .betting
        .place_wager(alice, market_id, "Broncos", dec!(100.00))
        .await
        .unwrap();
    assert_eq!(wager.potential_payout, dec!(190.00));
    assert_eq!(h.bankroll_of(alice).await, dec!(900.00));

    // The result feed reports full time; the poll triggers settlement.
    h.kick_off(market_id).await;
    h.feed.set_result("Broncos", "Cowboys", FeedStatus::Finished, Some((24, 12)));
    let report = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(report.settled, 1);

    assert_eq!(h.bankroll_of(alice).await, dec!(1090.00));

    let mut conn = h.pool.acquire().await.unwrap();
    let wagers = store::wagers_for_account(&mut conn, alice).await.unwrap();
    assert_eq!(wagers[0].status, WagerStatus::Won);

    let history = ledger::history_for(&mut conn, alice).await.unwrap();
    let flow: Vec<_> = history
        .iter()
        .filter(|e| e.wager_id == Some(wager.wager_id))
        .collect();
    assert_eq!(flow.len(), 2);
    assert_eq!(flow[0].change_kind, ChangeKind::WagerPlacement);
    assert_eq!(flow[0].amount_delta, dec!(-100.00));
    assert_eq!(flow[1].change_kind, ChangeKind::WagerWin);
    assert_eq!(flow[1].amount_delta, dec!(190.00));
    drop(conn);

    h.assert_ledger_consistent(alice).await;

    // One bankroll event, after the commit.
    let events = h.sink.recorded();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, BANKROLL_UPDATE);
    assert_eq!(events[0].1["reason"], "wager_win");
}

// ---------------------------------------------------------------------------
// Mixed outcomes and draws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mixed_outcomes_across_accounts() {
    let h = harness().await;
    let market_id = h.add_market("Storm", "Raiders", 24).await;
    let winner = h.add_account("winner", dec!(500.00)).await;
    let loser = h.add_account("loser", dec!(500.00)).await;

    h.feed.set_odds("Storm", "Raiders", dec!(1.50), dec!(2.60));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();

    h.betting.place_wager(winner, market_id, "Storm", dec!(200.00)).await.unwrap();
    h.betting.place_wager(loser, market_id, "Raiders", dec!(150.00)).await.unwrap();

    h.kick_off(market_id).await;
    h.feed.set_result("Storm", "Raiders", FeedStatus::Finished, Some((30, 14)));
    feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();

    // Winner: 500 - 200 + 300 = 600. Loser: 500 - 150 + 0 = 350.
    assert_eq!(h.bankroll_of(winner).await, dec!(600.00));
    assert_eq!(h.bankroll_of(loser).await, dec!(350.00));

    h.assert_ledger_consistent(winner).await;
    h.assert_ledger_consistent(loser).await;
}

#[tokio::test]
async fn test_draw_voids_every_wager() {
    let h = harness().await;
    let market_id = h.add_market("Sharks", "Eels", 24).await;
    let alice = h.add_account("alice", dec!(1000.00)).await;
    let bob = h.add_account("bob", dec!(1000.00)).await;

    h.feed.set_odds("Sharks", "Eels", dec!(1.80), dec!(2.20));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();

    h.betting.place_wager(alice, market_id, "Sharks", dec!(10.00)).await.unwrap();
    h.betting.place_wager(bob, market_id, "Eels", dec!(75.50)).await.unwrap();

    h.kick_off(market_id).await;
    h.feed.set_result("Sharks", "Eels", FeedStatus::Finished, Some((18, 18)));
    feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();

    // Both stakes come back exactly.
    assert_eq!(h.bankroll_of(alice).await, dec!(1000.00));
    assert_eq!(h.bankroll_of(bob).await, dec!(1000.00));

    let mut conn = h.pool.acquire().await.unwrap();
    for account in [alice, bob] {
        let wagers = store::wagers_for_account(&mut conn, account).await.unwrap();
        assert_eq!(wagers[0].status, WagerStatus::Void);
    }
    let market = store::get_market(&mut conn, market_id).await.unwrap().unwrap();
    assert_eq!(market.winner.as_deref(), Some("Draw"));
    drop(conn);

    h.assert_ledger_consistent(alice).await;
    h.assert_ledger_consistent(bob).await;
}

// ---------------------------------------------------------------------------
// Idempotency and feed behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_polls_settle_once() {
    let h = harness().await;
    let market_id = h.add_market("Titans", "Knights", 24).await;
    let alice = h.add_account("alice", dec!(1000.00)).await;

    h.feed.set_odds("Titans", "Knights", dec!(2.00), dec!(1.80));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();
    h.betting.place_wager(alice, market_id, "Titans", dec!(100.00)).await.unwrap();

    h.kick_off(market_id).await;
    h.feed.set_result("Titans", "Knights", FeedStatus::Finished, Some((20, 16)));

    // First poll settles; the market then leaves the unresolved set, so
    // later polls never touch it again.
    let first = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(first.settled, 1);
    let second = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(second.checked, 0);
    assert_eq!(second.settled, 0);

    assert_eq!(h.bankroll_of(alice).await, dec!(1100.00));
    h.assert_ledger_consistent(alice).await;

    let mut conn = h.pool.acquire().await.unwrap();
    let history = ledger::history_for(&mut conn, alice).await.unwrap();
    assert_eq!(history.len(), 3); // deposit, placement, win — nothing doubled
}

#[tokio::test]
async fn test_live_then_finished_lifecycle() {
    let h = harness().await;
    let market_id = h.add_market("Panthers", "Dolphins", 24).await;
    let alice = h.add_account("alice", dec!(1000.00)).await;

    h.feed.set_odds("Panthers", "Dolphins", dec!(1.30), dec!(3.40));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();
    h.betting.place_wager(alice, market_id, "Panthers", dec!(100.00)).await.unwrap();
    h.kick_off(market_id).await;

    // Half time: live, no settlement, wager untouched.
    h.feed.set_result("Panthers", "Dolphins", FeedStatus::Live, Some((12, 6)));
    let live_poll = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(live_poll.status_changes, 1);
    assert_eq!(live_poll.settled, 0);

    let mut conn = h.pool.acquire().await.unwrap();
    let market = store::get_market(&mut conn, market_id).await.unwrap().unwrap();
    assert_eq!(market.status, MarketStatus::Live);
    assert!(market.winner.is_none());
    drop(conn);
    assert_eq!(h.bankroll_of(alice).await, dec!(900.00));

    // Betting is closed while live.
    let rejected = h
        .betting
        .place_wager(alice, market_id, "Panthers", dec!(10.00))
        .await;
    assert!(rejected.is_err());

    // Full time settles.
    h.feed.set_result("Panthers", "Dolphins", FeedStatus::Finished, Some((28, 12)));
    feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(h.bankroll_of(alice).await, dec!(1030.00)); // 900 + 100 * 1.30
    h.assert_ledger_consistent(alice).await;
}

#[tokio::test]
async fn test_feed_outage_leaves_everything_pending() {
    let h = harness().await;
    let market_id = h.add_market("Rabbitohs", "Roosters", 24).await;
    let alice = h.add_account("alice", dec!(1000.00)).await;

    h.feed.set_odds("Rabbitohs", "Roosters", dec!(1.95), dec!(1.95));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();
    h.betting.place_wager(alice, market_id, "Rabbitohs", dec!(50.00)).await.unwrap();
    h.kick_off(market_id).await;

    h.feed.set_error("upstream 503");
    let report = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.settled, 0);

    // Nothing moved; the next healthy poll picks it up.
    assert_eq!(h.bankroll_of(alice).await, dec!(950.00));
    h.feed.clear_error();
    h.feed.set_result("Rabbitohs", "Roosters", FeedStatus::Finished, Some((10, 8)));
    let retry = feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();
    assert_eq!(retry.settled, 1);
    assert_eq!(h.bankroll_of(alice).await, dec!(1047.50)); // 950 + 50 * 1.95
}

// ---------------------------------------------------------------------------
// Round bonus interplay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bonus_then_bet_then_settle() {
    let h = harness().await;
    let market_id = h.add_market("Warriors", "Dragons", 48).await;
    let alice = h.add_account("alice", dec!(200.00)).await;

    // Round already started an hour ago; activation pays the bonus.
    let activated = h.rounds.activate_due_rounds(Utc::now()).await.unwrap();
    assert_eq!(activated.len(), 1);
    assert_eq!(h.bankroll_of(alice).await, dec!(1200.00));

    // Re-running the job never pays twice.
    h.rounds.activate_due_rounds(Utc::now()).await.unwrap();
    assert_eq!(h.bankroll_of(alice).await, dec!(1200.00));

    h.feed.set_odds("Warriors", "Dragons", dec!(2.50), dec!(1.55));
    feeds::refresh_odds(&h.pool, &h.feed, &h.round).await.unwrap();
    h.betting.place_wager(alice, market_id, "Warriors", dec!(1200.00)).await.unwrap();
    assert_eq!(h.bankroll_of(alice).await, dec!(0.00));

    h.kick_off(market_id).await;
    h.feed.set_result("Warriors", "Dragons", FeedStatus::Finished, Some((22, 20)));
    feeds::poll_results(&h.pool, &h.feed, &h.engine).await.unwrap();

    assert_eq!(h.bankroll_of(alice).await, dec!(3000.00)); // 1200 * 2.50
    h.assert_ledger_consistent(alice).await;

    // Full ledger shape: deposit, bonus, placement, win.
    let mut conn = h.pool.acquire().await.unwrap();
    let kinds: Vec<ChangeKind> = ledger::history_for(&mut conn, alice)
        .await
        .unwrap()
        .iter()
        .map(|e| e.change_kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::InitialDeposit,
            ChangeKind::RoundBonus,
            ChangeKind::WagerPlacement,
            ChangeKind::WagerWin,
        ]
    );
}
