use crate::domain::value_objects::MemberId;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 会員サービスポート
///
/// 循環コンテキストと会員コンテキストの境界を維持する。
/// 貸出資格のポリシー自体は会員コンテキスト側の責務であり、
/// エンジンは結果のみを前提条件として利用する。
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// 会員が存在するか確認する
    ///
    /// checkout / 予約作成前の会員バリデーションに使用される。
    async fn exists(&self, member_id: MemberId) -> Result<bool>;

    /// 会員に貸出資格があるか確認する
    ///
    /// ビジネスルール: 資格のない会員には貸出不可。
    /// ポリシーの内容（会費滞納、上限超過など）はエンジンの関知外。
    async fn is_eligible(&self, member_id: MemberId) -> Result<bool>;
}
