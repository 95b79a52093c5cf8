use agora_common::model::{
    ModelValidationError,
    auth::{AuthTokenHash, Credential},
    moderation::{ModerationRecord, RequestKey, WarningOutcome},
    post::Post,
    report::Report,
    user::User,
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub warnings: i32,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub author_snowflake: i64,
    pub username: String,
    pub content: String,
    pub report_count: i32,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ReportRecord {
    pub report_snowflake: i64,
    pub post_snowflake: i64,
    pub reason: String,
    pub additional_info: Option<String>,
    pub reported_by: i64,
    pub reported_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CredentialRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ActionRecord {
    pub action: String,
    pub post_snowflake: i64,
    pub author_snowflake: Option<i64>,
    pub moderator_snowflake: i64,
    pub warnings_issued: Option<i32>,
    pub user_terminated: Option<bool>,
    pub request_key: Option<String>,
    pub recorded_at: OffsetDateTime,
}

pub(crate) fn counter(value: i32) -> Result<u32, ModelValidationError> {
    u32::try_from(value).map_err(|_| ModelValidationError::CounterOutOfRange(value.into()))
}

pub(crate) fn column_counter(value: u32) -> Result<i32, ModelValidationError> {
    i32::try_from(value).map_err(|_| ModelValidationError::CounterOutOfRange(value.into()))
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_snowflake.into(),
            name: value.name,
            email: value.email,
            role: value.role.parse()?,
            warnings: counter(value.warnings)?,
        })
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_snowflake.into(),
            author_id: value.author_snowflake.into(),
            username: value.username,
            content: value.content,
            report_count: counter(value.report_count)?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<ReportRecord> for Report {
    type Error = ModelValidationError;

    fn try_from(value: ReportRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.report_snowflake.into(),
            post_id: value.post_snowflake.into(),
            reason: value.reason.parse()?,
            additional_info: value.additional_info,
            reported_by: value.reported_by.into(),
            time: value.reported_at,
        })
    }
}

impl TryFrom<CredentialRecord> for Credential {
    type Error = ModelValidationError;

    fn try_from(value: CredentialRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_snowflake.into(),
            token_hash: AuthTokenHash::try_from(value.token_hash.into_boxed_slice())?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}

impl TryFrom<ActionRecord> for ModerationRecord {
    type Error = ModelValidationError;

    fn try_from(value: ActionRecord) -> Result<Self, Self::Error> {
        let outcome = match (value.warnings_issued, value.user_terminated) {
            (Some(warnings_issued), Some(user_terminated)) => Some(WarningOutcome {
                warnings_issued: counter(warnings_issued)?,
                user_terminated,
            }),
            (None, None) => None,
            _ => return Err(ModelValidationError::IncompleteOutcome),
        };

        Ok(Self {
            action: value.action.parse()?,
            post: value.post_snowflake.into(),
            author: value.author_snowflake.map(Into::into),
            moderator: value.moderator_snowflake.into(),
            outcome,
            request_key: value.request_key.map(RequestKey::new).transpose()?,
            at: value.recorded_at,
        })
    }
}
