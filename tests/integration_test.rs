//! DAO-level integration tests against a real Postgres database.
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test integration_test -- --ignored
//!
//! Mirrors the sibling operator's split between pure unit tests (which live beside
//! their module) and DB-backed integration tests gated on an environment variable.

use chrono::Utc;
use libeufin_bank::amount::{Amount, FracDigits};
use libeufin_bank::conversion::{ConversionConfig, ConversionSide, RoundingMode};
use libeufin_bank::dao::{account, cashout, challenge, exchange, transaction, withdrawal};
use libeufin_bank::models::NewAccount;
use libeufin_bank::store::Store;

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

async fn test_store() -> Store {
    let url = database_url().expect("DATABASE_URL must be set for integration tests");
    let store = Store::connect(&url).await.expect("failed to connect to test database");
    store.run_migrations().await.expect("failed to run migrations");
    store
}

fn new_account(login: &str) -> NewAccount {
    NewAccount {
        login: login.to_string(),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$aGFzaA".to_string(),
        name: login.to_string(),
        phone: None,
        email: None,
        cashout_payto: None,
        internal_payto: format!("payto://iban/SANDBOXX/{login}"),
        tan_channel: "none".to_string(),
        is_public: false,
        is_taler_exchange: false,
    }
}

async fn ensure_account(store: &Store, login: &str) -> i64 {
    let outcome = account::create(store.pool(), new_account(login), "EUR").await.unwrap();
    match outcome {
        account::CreateOutcome::Created(a) => a.id,
        account::CreateOutcome::AlreadyExists(a) => a.id,
    }
}

/// Invariant 1: conservation. A posted transaction's debit and credit sides move
/// the same amount in opposite directions.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn conservation_holds_across_a_posting() {
    let store = test_store().await;
    let debtor = format!("conservation-debtor-{}", uuid::Uuid::new_v4());
    let creditor = format!("conservation-creditor-{}", uuid::Uuid::new_v4());
    ensure_account(&store, &debtor).await;
    ensure_account(&store, &creditor).await;

    let before_debtor = account::require_by_login(store.pool(), &debtor).await.unwrap();
    let before_creditor = account::require_by_login(store.pool(), &creditor).await.unwrap();

    let amount = Amount::new(5, 0, "EUR").unwrap();
    transaction::create(
        &store,
        transaction::NewTransaction {
            debtor_login: debtor.clone(),
            creditor_login: creditor.clone(),
            subject: "conservation test".to_string(),
            amount: amount.clone(),
            timestamp: Utc::now(),
            tan_ok: true,
            request_uid: None,
        },
    )
    .await
    .unwrap();

    let after_debtor = account::require_by_login(store.pool(), &debtor).await.unwrap();
    let after_creditor = account::require_by_login(store.pool(), &creditor).await.unwrap();

    assert!(before_debtor.balance_value - after_debtor.balance_value >= 0 || after_debtor.has_debit);
    assert_eq!(
        after_creditor.balance_value + after_creditor.balance_frac as i64,
        before_creditor.balance_value + before_creditor.balance_frac as i64 + amount.value as i64 * 100_000_000
            + amount.frac as i64
    );
}

/// Invariant 2: debit cap. A debtor cannot be pushed past its configured ceiling.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn debit_cap_rejects_transactions_past_the_ceiling() {
    let store = test_store().await;
    let debtor = format!("debit-cap-debtor-{}", uuid::Uuid::new_v4());
    let creditor = format!("debit-cap-creditor-{}", uuid::Uuid::new_v4());
    ensure_account(&store, &debtor).await;
    ensure_account(&store, &creditor).await;

    let huge = Amount::new(1_000_000, 0, "EUR").unwrap();
    let result = transaction::create(
        &store,
        transaction::NewTransaction {
            debtor_login: debtor,
            creditor_login: creditor,
            subject: "over the cap".to_string(),
            amount: huge,
            timestamp: Utc::now(),
            tan_ok: true,
            request_uid: None,
        },
    )
    .await;

    assert!(result.is_err(), "a debtor with no debit allowance must not overdraw");
}

/// Invariant 3: idempotency. Two identical requests sharing a `request_uid` post once.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn repeated_request_uid_posts_exactly_once() {
    let store = test_store().await;
    let debtor = format!("idem-debtor-{}", uuid::Uuid::new_v4());
    let creditor = format!("idem-creditor-{}", uuid::Uuid::new_v4());
    ensure_account(&store, &debtor).await;
    ensure_account(&store, &creditor).await;

    let request_uid = uuid::Uuid::new_v4().to_string();
    let amount = Amount::new(1, 0, "EUR").unwrap();

    let req = |request_uid: Option<String>| transaction::NewTransaction {
        debtor_login: debtor.clone(),
        creditor_login: creditor.clone(),
        subject: "idempotent transfer".to_string(),
        amount: amount.clone(),
        timestamp: Utc::now(),
        tan_ok: true,
        request_uid,
    };

    let first = transaction::create(&store, req(Some(request_uid.clone()))).await.unwrap();
    let second = transaction::create(&store, req(Some(request_uid.clone()))).await.unwrap();

    let first_row_id = match first {
        transaction::CreateOutcome::Posted { debtor_row_id, .. } => debtor_row_id,
        transaction::CreateOutcome::AlreadyPosted { row_id } => row_id,
    };
    let second_row_id = match second {
        transaction::CreateOutcome::Posted { debtor_row_id, .. } => debtor_row_id,
        transaction::CreateOutcome::AlreadyPosted { row_id } => row_id,
    };
    assert_eq!(first_row_id, second_row_id, "same request_uid must resolve to the same posting");
}

/// Invariant 4: monotone history. `row_id` strictly increases in commit order.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn history_row_ids_are_strictly_increasing() {
    let store = test_store().await;
    let debtor = format!("history-debtor-{}", uuid::Uuid::new_v4());
    let creditor = format!("history-creditor-{}", uuid::Uuid::new_v4());
    let creditor_id = ensure_account(&store, &creditor).await;
    ensure_account(&store, &debtor).await;

    for _ in 0..3 {
        transaction::create(
            &store,
            transaction::NewTransaction {
                debtor_login: debtor.clone(),
                creditor_login: creditor.clone(),
                subject: "sequence test".to_string(),
                amount: Amount::new(1, 0, "EUR").unwrap(),
                timestamp: Utc::now(),
                tan_ok: true,
                request_uid: None,
            },
        )
        .await
        .unwrap();
    }

    let rows = transaction::history(&store, creditor_id, 10, 0, 0).await.unwrap();
    let row_ids: Vec<i64> = rows.iter().map(|r| r.row_id).collect();
    let mut sorted = row_ids.clone();
    sorted.sort();
    assert_eq!(row_ids, sorted, "history must come back in row_id order");
    assert!(row_ids.windows(2).all(|w| w[0] < w[1]), "row_id must be strictly increasing");
}

/// Invariant 5: round-trip conversion. `inverse(forward(x)) == x` above `min_amount`.
#[test]
fn round_trip_conversion_reproduces_the_original_pair() {
    use libeufin_bank::conversion::{convert_cashout, inverse_cashout};

    let config = ConversionConfig {
        cashout: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::new(0, 500_000, "EUR").unwrap(),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
        cashin: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::new(0, 500_000, "EUR").unwrap(),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
    };

    let debit = Amount::new(10, 0, "EUR").unwrap();
    let credit = convert_cashout(&config, &debit, "EUR").unwrap();
    let (found_debit, found_credit) = inverse_cashout(&config, &credit, "EUR", "EUR").unwrap();
    assert_eq!(found_debit, debit);
    assert_eq!(found_credit, credit);
}

/// Invariant 6: challenge expiry. Past `expires_at`, no `try` succeeds even with the
/// correct code, and `resend` always yields a fresh one.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn expired_challenges_reject_the_correct_code_and_resend_refreshes() {
    let store = test_store().await;
    let account_id = ensure_account(&store, &format!("challenge-{}", uuid::Uuid::new_v4())).await;

    let now = Utc::now();
    let id = challenge::create(store.pool(), account_id, "withdrawal", now, chrono::Duration::seconds(-1), 3)
        .await
        .unwrap();

    let challenge_row = challenge::get(store.pool(), id).await.unwrap().unwrap();
    let result = challenge::try_code(store.pool(), id, &challenge_row.code, Utc::now()).await.unwrap();
    assert!(result.expired, "a challenge past its expiry must reject even the right code");

    let refreshed = challenge::resend(
        store.pool(),
        id,
        Utc::now(),
        chrono::Duration::minutes(1),
        chrono::Duration::minutes(5),
        3,
    )
    .await
    .unwrap();
    assert_ne!(refreshed, challenge_row.code, "resend after expiry must issue a new code");
}

/// TAN-gated cashout: creating without a solved challenge issues a ChallengeRequired
/// error carrying a fresh challenge id rather than silently posting.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cashout_without_tan_raises_challenge_required() {
    let store = test_store().await;
    let login = format!("cashout-{}", uuid::Uuid::new_v4());
    let account_id = ensure_account(&store, &login).await;
    account::set_cashout_payto(store.pool(), account_id, Some("payto://iban/EXTERNAL/1"))
        .await
        .unwrap();
    account::set_tan_channel(store.pool(), account_id, libeufin_bank::models::TanChannel::Sms.as_str())
        .await
        .unwrap();

    let config = ConversionConfig {
        cashout: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::zero("EUR"),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
        cashin: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::zero("EUR"),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
    };

    let debit = Amount::parse("EUR:1", FracDigits::Eight).unwrap();
    let credit = Amount::parse("EUR:1", FracDigits::Eight).unwrap();
    let result = cashout::create(
        &store,
        &login,
        &uuid::Uuid::new_v4().to_string(),
        &debit,
        &credit,
        &config,
        "EUR",
        false,
        Utc::now(),
    )
    .await;

    assert!(result.is_err(), "cashout without a solved TAN challenge must not post");
}

fn new_exchange_account(login: &str) -> NewAccount {
    NewAccount {
        is_taler_exchange: true,
        ..new_account(login)
    }
}

/// Withdrawal seed scenario: pending -> selected -> confirmed, with the ledger
/// showing a debit to the wallet and a credit to the exchange.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn withdrawal_flow_runs_pending_to_confirmed() {
    let store = test_store().await;
    let wallet_login = format!("withdraw-wallet-{}", uuid::Uuid::new_v4());
    let exchange_login = format!("withdraw-exchange-{}", uuid::Uuid::new_v4());
    let wallet_id = ensure_account(&store, &wallet_login).await;
    let exchange_outcome = account::create(store.pool(), new_exchange_account(&exchange_login), "EUR")
        .await
        .unwrap();
    let exchange = match exchange_outcome {
        account::CreateOutcome::Created(a) => a,
        account::CreateOutcome::AlreadyExists(a) => a,
    };

    let amount = Amount::new(9, 0, "EUR").unwrap();
    account::set_debit_threshold(store.pool(), wallet_id, &amount).await.unwrap();

    let wallet_uuid = uuid::Uuid::new_v4();
    let now = Utc::now();
    let created = withdrawal::create(&store, &wallet_login, wallet_uuid, &amount, now).await.unwrap();
    assert_eq!(created.status, "pending");

    let selected = withdrawal::set_details(&store, wallet_uuid, &exchange.internal_payto, "some-reserve-pub")
        .await
        .unwrap();
    assert_eq!(selected.status, "selected");

    let confirmed = withdrawal::confirm(&store, wallet_uuid, now, true).await.unwrap();
    assert_eq!(confirmed.status, "confirmed");
    assert!(confirmed.confirmed);

    let wallet_after = account::require_by_login(store.pool(), &wallet_login).await.unwrap();
    assert!(wallet_after.has_debit, "withdrawing the full balance plus allowance must debit the wallet");
    let exchange_after = account::find_by_id(store.pool(), exchange.id).await.unwrap().unwrap();
    assert_eq!(exchange_after.balance_value, 9);
}

/// Exchange bounce scenario: reusing a `reserve_pub`-shaped subject against the same
/// exchange account reverses the second posting instead of crediting it twice.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn reused_reserve_pub_subject_is_bounced() {
    let store = test_store().await;
    let debtor_login = format!("bounce-debtor-{}", uuid::Uuid::new_v4());
    let exchange_login = format!("bounce-exchange-{}", uuid::Uuid::new_v4());
    let debtor_id = ensure_account(&store, &debtor_login).await;
    let exchange_outcome = account::create(store.pool(), new_exchange_account(&exchange_login), "EUR")
        .await
        .unwrap();
    let exchange = match exchange_outcome {
        account::CreateOutcome::Created(a) => a,
        account::CreateOutcome::AlreadyExists(a) => a,
    };
    account::set_debit_threshold(store.pool(), debtor_id, &Amount::new(100, 0, "EUR").unwrap())
        .await
        .unwrap();

    let reserve_pub_subject = "0".repeat(52);
    let amount = Amount::new(1, 0, "EUR").unwrap();

    transaction::create(
        &store,
        transaction::NewTransaction {
            debtor_login: debtor_login.clone(),
            creditor_login: exchange_login.clone(),
            subject: reserve_pub_subject.clone(),
            amount: amount.clone(),
            timestamp: Utc::now(),
            tan_ok: true,
            request_uid: None,
        },
    )
    .await
    .unwrap();

    transaction::create(
        &store,
        transaction::NewTransaction {
            debtor_login,
            creditor_login: exchange_login,
            subject: reserve_pub_subject,
            amount,
            timestamp: Utc::now(),
            tan_ok: true,
            request_uid: None,
        },
    )
    .await
    .unwrap();

    let incoming = exchange::history_incoming(&store, exchange.id, 10, 0).await.unwrap();
    assert_eq!(incoming.len(), 1, "a reused reserve_pub must not appear twice in incoming history");
}

/// Cashout 2FA seed scenario: confirming the challenge with the right code commits
/// the deferred debit; a still-unsolved challenge stays expirable.
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cashout_confirms_once_the_tan_challenge_is_solved() {
    let store = test_store().await;
    let login = format!("cashout-confirm-{}", uuid::Uuid::new_v4());
    let account_id = ensure_account(&store, &login).await;
    account::set_cashout_payto(store.pool(), account_id, Some("payto://iban/EXTERNAL/1"))
        .await
        .unwrap();
    account::set_tan_channel(store.pool(), account_id, libeufin_bank::models::TanChannel::Sms.as_str())
        .await
        .unwrap();
    account::set_debit_threshold(store.pool(), account_id, &Amount::new(10, 0, "EUR").unwrap())
        .await
        .unwrap();

    let config = ConversionConfig {
        cashout: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::zero("EUR"),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
        cashin: ConversionSide {
            ratio_num: 1,
            ratio_den: 1,
            fee: Amount::zero("EUR"),
            tiny_amount: Amount::new(0, 1_000_000, "EUR").unwrap(),
            rounding_mode: RoundingMode::Zero,
            min_amount: Amount::zero("EUR"),
        },
    };

    let debit = Amount::parse("EUR:1", FracDigits::Eight).unwrap();
    let credit = Amount::parse("EUR:1", FracDigits::Eight).unwrap();
    let creation_error = cashout::create(
        &store,
        &login,
        &uuid::Uuid::new_v4().to_string(),
        &debit,
        &credit,
        &config,
        "EUR",
        false,
        Utc::now(),
    )
    .await
    .unwrap_err();

    let challenge_id = match creation_error {
        libeufin_bank::error::BankError::ChallengeRequired { challenge_id } => challenge_id,
        other => panic!("expected ChallengeRequired, got {other:?}"),
    };

    let cashouts = cashout::list_for_account(&store, account_id).await.unwrap();
    let pending = cashouts.into_iter().find(|c| c.tan_challenge_id == Some(challenge_id)).unwrap();
    assert!(pending.confirmed_at.is_none());

    let challenge_row = challenge::get(store.pool(), challenge_id).await.unwrap().unwrap();
    let result = challenge::try_code(store.pool(), challenge_id, &challenge_row.code, Utc::now())
        .await
        .unwrap();
    assert!(result.ok);

    let confirmed = cashout::confirm(&store, pending.id, true).await.unwrap();
    assert!(confirmed.confirmed_at.is_some());

    let account_after = account::require_by_login(store.pool(), &login).await.unwrap();
    assert!(account_after.has_debit, "the deferred debit must post only on confirm");
}
