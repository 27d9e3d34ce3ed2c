use chrono::{DateTime, Duration, Utc};
use library_circulation::adapters::memory::{MembershipService as MockMembershipService, MemoryStore};
use library_circulation::application::circulation::{ServiceDependencies, checkout};
use library_circulation::domain::commands::Checkout;
use library_circulation::domain::transaction::LOAN_PERIOD_DAYS;
use library_circulation::domain::value_objects::{BookId, MemberId};
use library_circulation::domain::{FinePolicy, Transaction, book};
use std::sync::Arc;

/// テスト用の依存関係一式
///
/// インメモリストアとモック会員サービスを束ねる。ストアとモックへの
/// 参照を保持しておくことで、テスト側から状態の投入と検証ができる。
pub struct TestContext {
    pub deps: ServiceDependencies,
    pub store: Arc<MemoryStore>,
    pub membership: Arc<MockMembershipService>,
}

/// インメモリ実装でテストコンテキストを構築する
pub fn setup() -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let membership = Arc::new(MockMembershipService::new());

    let deps = ServiceDependencies {
        store: store.clone(),
        membership: membership.clone(),
        fine_policy: FinePolicy::default(),
    };

    TestContext {
        deps,
        store,
        membership,
    }
}

/// 貸出資格のある会員を登録する
pub fn register_member(ctx: &TestContext) -> MemberId {
    let member_id = MemberId::new();
    ctx.membership.register_member(member_id);
    member_id
}

/// Availableの書籍を投入する
pub async fn seed_available_book(ctx: &TestContext) -> BookId {
    let book_id = BookId::new();
    ctx.store
        .seed_book(book::register_book(book_id, Utc::now()))
        .await;
    book_id
}

/// 指定時刻に貸し出す（テストの前提条件づくり用）
pub async fn checkout_at(
    ctx: &TestContext,
    book_id: BookId,
    member_id: MemberId,
    requested_at: DateTime<Utc>,
) -> Transaction {
    let cmd = Checkout {
        book_id,
        member_id,
        due_date: requested_at + Duration::days(LOAN_PERIOD_DAYS),
        requested_at,
    };
    checkout(&ctx.deps, cmd)
        .await
        .expect("checkout should succeed")
}

/// いま貸し出す（テストの前提条件づくり用）
pub async fn checkout_now(ctx: &TestContext, book_id: BookId, member_id: MemberId) -> Transaction {
    checkout_at(ctx, book_id, member_id, Utc::now()).await
}
