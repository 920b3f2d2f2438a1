//! Drives one "user asks, system generates" transaction.
//!
//! ```text
//! RECEIVED -> QUOTA_CHECKED -> USER_MESSAGE_PERSISTED -> [DESCRIBED] -> MODEL_INVOKED
//!          -> ASSET_UPLOADED -> ASSISTANT_MESSAGE_PERSISTED -> DONE
//! ```
//!
//! Terminal failures are `QUOTA_DENIED`, `POLICY_VIOLATION` and `PROVIDER_ERROR`.
//! The user's unit is charged together with the user message, so whatever
//! fails afterwards the counter and the message sequence agree.

use futures::future::join_all;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::dtos::chats::{MAX_CHAT_NAME_CHARS, MAX_PROMPT_CHARS};
use crate::error::StudioError;
use crate::models::{
    ChargeOutcome, Chat, ChatDeletion, ChatSummary, Message, MessageRole, NewMessage,
};
use crate::services::entitlement::EntitlementResolver;
use crate::services::media::{MediaStore, StoredAsset};
use crate::services::metrics::{record_generation, record_quota_denial};
use crate::services::providers::{GenerativeModel, ProviderError};
use crate::services::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Received,
    QuotaChecked,
    UserMessagePersisted,
    Described,
    ModelInvoked,
    AssetUploaded,
    AssistantMessagePersisted,
    Done,
    QuotaDenied,
    PolicyViolation,
    ProviderError,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Received => "received",
            GenerationState::QuotaChecked => "quota_checked",
            GenerationState::UserMessagePersisted => "user_message_persisted",
            GenerationState::Described => "described",
            GenerationState::ModelInvoked => "model_invoked",
            GenerationState::AssetUploaded => "asset_uploaded",
            GenerationState::AssistantMessagePersisted => "assistant_message_persisted",
            GenerationState::Done => "done",
            GenerationState::QuotaDenied => "quota_denied",
            GenerationState::PolicyViolation => "policy_violation",
            GenerationState::ProviderError => "provider_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Done
                | GenerationState::QuotaDenied
                | GenerationState::PolicyViolation
                | GenerationState::ProviderError
        )
    }
}

/// Tracks one run through the state machine and logs every transition.
struct Run {
    chat_id: Uuid,
    state: GenerationState,
}

impl Run {
    fn new(chat_id: Uuid) -> Self {
        tracing::info!(chat_id = %chat_id, state = "received", "Generation started");
        Self {
            chat_id,
            state: GenerationState::Received,
        }
    }

    fn advance(&mut self, next: GenerationState) {
        tracing::info!(
            chat_id = %self.chat_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Generation state transition"
        );
        self.state = next;
        if next.is_terminal() {
            record_generation(next.as_str());
        }
    }

    fn fail(&mut self, terminal: GenerationState, err: StudioError) -> StudioError {
        tracing::warn!(
            chat_id = %self.chat_id,
            failed_in = self.state.as_str(),
            error = %err,
            "Generation failed"
        );
        self.advance(terminal);
        err
    }
}

pub struct GenerationOrchestrator {
    store: Arc<dyn Store>,
    entitlements: EntitlementResolver,
    model: Arc<dyn GenerativeModel>,
    media: Arc<dyn MediaStore>,
    quota: QuotaConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        entitlements: EntitlementResolver,
        model: Arc<dyn GenerativeModel>,
        media: Arc<dyn MediaStore>,
        quota: QuotaConfig,
    ) -> Self {
        Self {
            store,
            entitlements,
            model,
            media,
            quota,
        }
    }

    // ===== Chat Operations =====

    #[instrument(skip(self))]
    pub async fn create_chat(&self, user_id: Uuid, name: &str) -> Result<Chat, StudioError> {
        let name = validate_chat_name(name)?;
        let chat = self.store.create_chat(&Chat::new(user_id, name)).await?;
        tracing::info!(chat_id = %chat.id, "Chat created");
        Ok(chat)
    }

    #[instrument(skip(self))]
    pub async fn get_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StudioError> {
        Ok(self.store.list_chats(user_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn edit_chat(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        name: &str,
    ) -> Result<Chat, StudioError> {
        let name = validate_chat_name(name)?;
        self.owned_chat(user_id, chat_id).await?;
        Ok(self.store.rename_chat(chat_id, name).await?)
    }

    /// Delete every image asset of the chat, then the chat itself. Asset
    /// failures are collected and do not stop the chat from being deleted.
    #[instrument(skip(self))]
    pub async fn delete_chat(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> Result<ChatDeletion, StudioError> {
        self.owned_chat(user_id, chat_id).await?;

        let asset_ids: Vec<String> = self
            .store
            .list_messages(chat_id, user_id)
            .await?
            .into_iter()
            .filter_map(|m| m.image_asset_id)
            .collect();

        let results = join_all(asset_ids.iter().map(|id| self.media.delete(id))).await;

        let mut deletion = ChatDeletion::default();
        for (asset_id, result) in asset_ids.into_iter().zip(results) {
            match result {
                Ok(()) => deletion.deleted_assets += 1,
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, asset_id = %asset_id, error = %e, "Failed to delete chat asset");
                    deletion.failed_assets.push(asset_id);
                }
            }
        }

        self.store.delete_chat(chat_id).await?;

        tracing::info!(
            chat_id = %chat_id,
            deleted_assets = deletion.deleted_assets,
            failed_assets = deletion.failed_assets.len(),
            "Chat deleted"
        );
        Ok(deletion)
    }

    // ===== Message Operations =====

    #[instrument(skip(self))]
    pub async fn get_messages(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Vec<Message>, StudioError> {
        self.owned_chat(user_id, chat_id).await?;
        Ok(self.store.list_messages(chat_id, user_id).await?)
    }

    /// Check the quota and persist the user's prompt, charging one unit.
    #[instrument(skip(self, prompt, image))]
    pub async fn create_user_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<Message, StudioError> {
        let prompt = validate_prompt(prompt)?;
        let image = validate_image(image)?;
        self.owned_chat(user_id, chat_id).await?;

        let mut run = Run::new(chat_id);
        let message = self
            .charge_user_message(&mut run, user_id, chat_id, prompt, image)
            .await?;
        run.advance(GenerationState::Done);
        Ok(message)
    }

    /// Answer the chat's pending, already charged prompt.
    #[instrument(skip(self, prompt, image))]
    pub async fn create_assistant_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<Message, StudioError> {
        let prompt = validate_prompt(prompt)?;
        let image = validate_image(image)?;
        self.owned_chat(user_id, chat_id).await?;

        // A charged prompt is answered at most once. Of two concurrent
        // requests only one wins the claim.
        let pending = match self.store.last_message(chat_id).await? {
            Some(last) if last.role == MessageRole::User => last,
            _ => return Err(no_pending_prompt()),
        };
        if !self.store.claim_prompt(pending.id).await? {
            return Err(no_pending_prompt());
        }

        let mut run = Run::new(chat_id);
        run.advance(GenerationState::UserMessagePersisted);
        self.answer(&mut run, user_id, chat_id, prompt, image).await
    }

    /// The whole machine in one call.
    #[instrument(skip(self, prompt, image))]
    pub async fn generate(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<(Message, Message), StudioError> {
        let prompt = validate_prompt(prompt)?;
        let image = validate_image(image)?;
        self.owned_chat(user_id, chat_id).await?;

        let mut run = Run::new(chat_id);
        let user_message = self
            .charge_user_message(&mut run, user_id, chat_id, prompt, image)
            .await?;
        match self.store.claim_prompt(user_message.id).await {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent assistant request is answering this prompt.
                run.advance(GenerationState::Done);
                return Err(no_pending_prompt());
            }
            Err(e) => return Err(self.provider_failure(&mut run, user_id, e.into()).await),
        }
        let assistant_message = self.answer(&mut run, user_id, chat_id, prompt, image).await?;
        Ok((user_message, assistant_message))
    }

    // ===== Steps =====

    async fn charge_user_message(
        &self,
        run: &mut Run,
        user_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<Message, StudioError> {
        let entitlement = match self.entitlements.resolve(user_id).await {
            Ok(entitlement) => entitlement,
            Err(e) => return Err(run.fail(GenerationState::QuotaDenied, e)),
        };
        if !entitlement.is_entitled {
            record_quota_denial("precheck");
            return Err(run.fail(GenerationState::QuotaDenied, StudioError::QuotaExceeded));
        }
        run.advance(GenerationState::QuotaChecked);

        let asset = match image {
            Some(image) => match self.media.upload(image).await {
                Ok(asset) => Some(asset),
                Err(e) => return Err(run.fail(GenerationState::ProviderError, e.into())),
            },
            None => None,
        };

        let message = NewMessage {
            chat_id,
            user_id,
            role: MessageRole::User,
            prompt: prompt.to_string(),
            image: asset.as_ref().map(|a| a.url.clone()),
            image_asset_id: asset.as_ref().map(|a| a.asset_id.clone()),
        };

        let outcome = self
            .store
            .insert_charged_message(message, self.quota.free_quota, entitlement.is_subscribed)
            .await;

        match outcome {
            Ok(ChargeOutcome::Charged { message, count }) => {
                tracing::info!(chat_id = %chat_id, message_id = %message.id, count, "User message charged");
                run.advance(GenerationState::UserMessagePersisted);
                Ok(message)
            }
            Ok(ChargeOutcome::QuotaExhausted) => {
                // Lost the race with a concurrent submit.
                self.discard_asset(asset.as_ref()).await;
                record_quota_denial("charge");
                Err(run.fail(GenerationState::QuotaDenied, StudioError::QuotaExceeded))
            }
            Err(e) => {
                self.discard_asset(asset.as_ref()).await;
                Err(run.fail(GenerationState::ProviderError, e.into()))
            }
        }
    }

    async fn answer(
        &self,
        run: &mut Run,
        user_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<Message, StudioError> {
        let full_prompt = match image {
            Some(image) => match self.model.describe(image).await {
                Ok(description) => {
                    run.advance(GenerationState::Described);
                    format!("{}\n\n{}", prompt, description)
                }
                // No fallback to the undescribed prompt.
                Err(ProviderError::PolicyViolation(reason)) => {
                    return Err(self.record_policy_violation(run, user_id, chat_id, reason).await)
                }
                Err(e) => return Err(self.provider_failure(run, user_id, e.into()).await),
            },
            None => prompt.to_string(),
        };

        let generated = match self.model.generate(&full_prompt).await {
            Ok(generated) => generated,
            Err(ProviderError::PolicyViolation(reason)) => {
                return Err(self.record_policy_violation(run, user_id, chat_id, reason).await)
            }
            Err(e) => return Err(self.provider_failure(run, user_id, e.into()).await),
        };
        run.advance(GenerationState::ModelInvoked);

        let asset = match self.media.upload(&generated.url).await {
            Ok(asset) => asset,
            Err(e) => return Err(self.provider_failure(run, user_id, e.into()).await),
        };
        run.advance(GenerationState::AssetUploaded);

        let message = NewMessage {
            chat_id,
            user_id,
            role: MessageRole::Assistant,
            prompt: generated.revised_prompt,
            image: Some(asset.url.clone()),
            image_asset_id: Some(asset.asset_id.clone()),
        };
        let message = match self.store.insert_message(message).await {
            Ok(message) => message,
            Err(e) => {
                self.discard_asset(Some(&asset)).await;
                return Err(self.provider_failure(run, user_id, e.into()).await);
            }
        };
        run.advance(GenerationState::AssistantMessagePersisted);
        run.advance(GenerationState::Done);
        Ok(message)
    }

    /// Record the refusal as an assistant message so the user sees why.
    async fn record_policy_violation(
        &self,
        run: &mut Run,
        user_id: Uuid,
        chat_id: Uuid,
        reason: String,
    ) -> StudioError {
        let message = NewMessage {
            chat_id,
            user_id,
            role: MessageRole::Assistant,
            prompt: reason.clone(),
            image: None,
            image_asset_id: None,
        };
        if let Err(e) = self.store.insert_message(message).await {
            tracing::error!(chat_id = %chat_id, error = %e, "Failed to record policy violation message");
        }
        run.fail(
            GenerationState::PolicyViolation,
            StudioError::ContentPolicyViolation { reason },
        )
    }

    async fn provider_failure(&self, run: &mut Run, user_id: Uuid, err: StudioError) -> StudioError {
        let err = run.fail(GenerationState::ProviderError, err);
        if self.quota.refund_failed_generations {
            match self.store.refund_generation(user_id).await {
                Ok(count) => tracing::info!(user_id = %user_id, count, "Refunded failed generation"),
                Err(e) => tracing::error!(user_id = %user_id, error = %e, "Refund failed"),
            }
        }
        err
    }

    async fn discard_asset(&self, asset: Option<&StoredAsset>) {
        if let Some(asset) = asset {
            if let Err(e) = self.media.delete(&asset.asset_id).await {
                tracing::warn!(asset_id = %asset.asset_id, error = %e, "Failed to discard uploaded asset");
            }
        }
    }

    async fn owned_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<Chat, StudioError> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| StudioError::NotFound("Chat not found".into()))?;
        if chat.user_id != user_id {
            return Err(StudioError::Authorization(
                "You do not have access to this chat".into(),
            ));
        }
        Ok(chat)
    }
}

// ===== Validation =====

fn no_pending_prompt() -> StudioError {
    StudioError::Validation("No unanswered prompt in this chat".into())
}

fn validate_prompt(prompt: &str) -> Result<&str, StudioError> {
    let trimmed = prompt.trim();
    let chars = trimmed.chars().count() as u64;
    if chars == 0 || chars > MAX_PROMPT_CHARS {
        return Err(StudioError::Validation(format!(
            "Prompt must be between 1 and {} characters",
            MAX_PROMPT_CHARS
        )));
    }
    Ok(trimmed)
}

fn validate_image(image: Option<&str>) -> Result<Option<&str>, StudioError> {
    match image {
        None => Ok(None),
        Some(image) if image.starts_with("data:image/") && image.contains(";base64,") => {
            Ok(Some(image))
        }
        Some(_) => Err(StudioError::Validation(
            "Image must be a base64 data URI".into(),
        )),
    }
}

fn validate_chat_name(name: &str) -> Result<&str, StudioError> {
    let trimmed = name.trim();
    let chars = trimmed.chars().count() as u64;
    if chars == 0 || chars > MAX_CHAT_NAME_CHARS {
        return Err(StudioError::Validation(format!(
            "Chat name must be between 1 and {} characters",
            MAX_CHAT_NAME_CHARS
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::media::MediaError;
    use crate::services::memory::InMemoryStore;
    use crate::services::providers::mock::{MockBehavior, MockModel};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const IMAGE: &str = "data:image/png;base64,aGVsbG8=";

    #[derive(Default)]
    struct RecordingMedia {
        uploads: Mutex<usize>,
        deleted: Mutex<Vec<String>>,
        fail_delete: Option<String>,
    }

    #[async_trait]
    impl MediaStore for RecordingMedia {
        async fn upload(&self, _source: &str) -> Result<StoredAsset, MediaError> {
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            Ok(StoredAsset {
                url: format!("https://media.test/{}.png", *uploads),
                asset_id: format!("asset-{}", *uploads),
            })
        }

        async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
            if self.fail_delete.as_deref() == Some(asset_id) {
                return Err(MediaError::Network("timeout".into()));
            }
            self.deleted.lock().unwrap().push(asset_id.to_string());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        media: Arc<RecordingMedia>,
        model: Arc<MockModel>,
        orchestrator: GenerationOrchestrator,
        user: User,
        chat: Chat,
    }

    async fn fixture(model: MockModel, media: RecordingMedia, quota: QuotaConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let media = Arc::new(media);
        let model = Arc::new(model);
        let user = store.insert_user(User::new("Ada", "ada@example.com"));
        let chat = store.create_chat(&Chat::new(user.id, "sketches")).await.unwrap();
        let resolver = EntitlementResolver::new(store.clone(), quota.clone());
        let orchestrator = GenerationOrchestrator::new(
            store.clone(),
            resolver,
            model.clone(),
            media.clone(),
            quota,
        );
        Fixture {
            store,
            media,
            model,
            orchestrator,
            user,
            chat,
        }
    }

    async fn count(f: &Fixture) -> i32 {
        f.store.get_user(f.user.id).await.unwrap().unwrap().count
    }

    #[tokio::test]
    async fn full_generation_persists_both_messages() {
        let f = fixture(MockModel::new(), RecordingMedia::default(), QuotaConfig::default()).await;

        let (user_msg, assistant_msg) = f
            .orchestrator
            .generate(f.user.id, f.chat.id, "a red fox", Some(IMAGE))
            .await
            .unwrap();

        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.image_asset_id.as_deref(), Some("asset-1"));
        assert_eq!(assistant_msg.role, MessageRole::Assistant);
        assert_eq!(assistant_msg.image_asset_id.as_deref(), Some("asset-2"));
        assert!(assistant_msg.prompt.contains("a red fox\n\nA mock description"));
        assert_eq!(f.model.describe_calls(), 1);
        assert_eq!(count(&f).await, 1);
    }

    #[tokio::test]
    async fn sixth_prompt_is_denied_without_writes() {
        let f = fixture(MockModel::new(), RecordingMedia::default(), QuotaConfig::default()).await;

        for _ in 0..5 {
            f.orchestrator
                .create_user_message(f.user.id, f.chat.id, "hello", None)
                .await
                .unwrap();
        }
        let err = f
            .orchestrator
            .create_user_message(f.user.id, f.chat.id, "hello", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::QuotaExceeded));
        assert_eq!(count(&f).await, 5);
        assert_eq!(f.store.message_count(), 5);
    }

    #[tokio::test]
    async fn policy_violation_charges_once_and_explains() {
        let model = MockModel::scripted([MockBehavior::RejectPolicy(
            "Your request was rejected by the safety system.".into(),
        )]);
        let f = fixture(model, RecordingMedia::default(), QuotaConfig::default()).await;

        let err = f
            .orchestrator
            .generate(f.user.id, f.chat.id, "something bad", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::ContentPolicyViolation { .. }));
        assert_eq!(count(&f).await, 1);

        let messages = f.orchestrator.get_messages(f.user.id, f.chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].prompt, "Your request was rejected by the safety system.");
        assert!(messages[1].image.is_none());
    }

    #[tokio::test]
    async fn provider_failure_keeps_charge_by_default() {
        let model = MockModel::scripted([MockBehavior::Fail("upstream 500".into())]);
        let f = fixture(model, RecordingMedia::default(), QuotaConfig::default()).await;

        let err = f
            .orchestrator
            .generate(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::ExternalProvider { .. }));
        assert_eq!(count(&f).await, 1);
        assert_eq!(f.store.message_count(), 1);
    }

    #[tokio::test]
    async fn provider_failure_refunds_when_enabled() {
        let model = MockModel::scripted([MockBehavior::Fail("upstream 500".into())]);
        let quota = QuotaConfig {
            refund_failed_generations: true,
            ..QuotaConfig::default()
        };
        let f = fixture(model, RecordingMedia::default(), quota).await;

        f.orchestrator
            .generate(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap_err();
        assert_eq!(count(&f).await, 0);
    }

    #[tokio::test]
    async fn assistant_step_requires_pending_prompt() {
        let f = fixture(MockModel::new(), RecordingMedia::default(), QuotaConfig::default()).await;

        let err = f
            .orchestrator
            .create_assistant_message(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));

        f.orchestrator
            .create_user_message(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap();
        f.orchestrator
            .create_assistant_message(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap();

        // Answered; a second answer would be free.
        assert!(f
            .orchestrator
            .create_assistant_message(f.user.id, f.chat.id, "fox", None)
            .await
            .is_err());
        assert_eq!(f.model.generate_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_answers_to_one_prompt_generate_once() {
        let model = MockModel::new().with_latency(Duration::from_millis(50));
        let f = fixture(model, RecordingMedia::default(), QuotaConfig::default()).await;

        f.orchestrator
            .create_user_message(f.user.id, f.chat.id, "fox", None)
            .await
            .unwrap();
        let (a, b) = tokio::join!(
            f.orchestrator
                .create_assistant_message(f.user.id, f.chat.id, "fox", None),
            f.orchestrator
                .create_assistant_message(f.user.id, f.chat.id, "fox", None),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(a.err().or(b.err()), Some(StudioError::Validation(_))));
        assert_eq!(f.model.generate_calls(), 1);
        assert_eq!(count(&f).await, 1);
        assert_eq!(f.store.message_count(), 2);
    }

    #[tokio::test]
    async fn rejected_reference_image_is_recorded_not_refunded() {
        let model = MockModel::new()
            .with_describe_script([MockBehavior::RejectPolicy("unsafe image".into())]);
        let quota = QuotaConfig {
            refund_failed_generations: true,
            ..QuotaConfig::default()
        };
        let f = fixture(model, RecordingMedia::default(), quota).await;

        let err = f
            .orchestrator
            .generate(f.user.id, f.chat.id, "fox", Some(IMAGE))
            .await
            .unwrap_err();

        assert!(
            matches!(err, StudioError::ContentPolicyViolation { ref reason } if reason == "unsafe image")
        );
        assert_eq!(f.model.generate_calls(), 0);
        assert_eq!(count(&f).await, 1);
        let messages = f.orchestrator.get_messages(f.user.id, f.chat.id).await.unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
        assert_eq!(messages[1].prompt, "unsafe image");
        assert!(messages[1].image.is_none());
    }

    #[tokio::test]
    async fn describe_failure_stops_before_generation() {
        let model =
            MockModel::new().with_describe_script([MockBehavior::Fail("vision model down".into())]);
        let f = fixture(model, RecordingMedia::default(), QuotaConfig::default()).await;

        let err = f
            .orchestrator
            .generate(f.user.id, f.chat.id, "fox", Some(IMAGE))
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::ExternalProvider { .. }));
        assert_eq!(f.model.describe_calls(), 1);
        assert_eq!(f.model.generate_calls(), 0);
        assert_eq!(f.store.message_count(), 1);
        assert_eq!(count(&f).await, 1);
    }

    #[tokio::test]
    async fn delete_chat_continues_past_asset_failures() {
        let media = RecordingMedia {
            fail_delete: Some("asset-2".into()),
            ..RecordingMedia::default()
        };
        let f = fixture(MockModel::new(), media, QuotaConfig::default()).await;

        f.orchestrator
            .generate(f.user.id, f.chat.id, "fox", Some(IMAGE))
            .await
            .unwrap();

        let deletion = f.orchestrator.delete_chat(f.user.id, f.chat.id).await.unwrap();

        assert_eq!(deletion.deleted_assets, 1);
        assert_eq!(deletion.failed_assets, vec!["asset-2".to_string()]);
        assert_eq!(*f.media.deleted.lock().unwrap(), vec!["asset-1".to_string()]);
        assert_eq!(f.store.message_count(), 0);
        assert!(f.store.get_chat(f.chat.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_chat_is_rejected() {
        let f = fixture(MockModel::new(), RecordingMedia::default(), QuotaConfig::default()).await;
        let intruder = f.store.insert_user(User::new("Eve", "eve@example.com"));

        let err = f
            .orchestrator
            .create_user_message(intruder.id, f.chat.id, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Authorization(_)));
        assert_eq!(
            f.store.get_user(intruder.id).await.unwrap().unwrap().count,
            0
        );
    }

    #[test]
    fn validation_rules() {
        assert!(validate_prompt("   ").is_err());
        assert_eq!(validate_prompt("  fox ").unwrap(), "fox");
        assert!(validate_prompt(&"a".repeat(4001)).is_err());
        assert!(validate_prompt(&"a".repeat(4000)).is_ok());
        assert!(validate_image(Some("https://example.com/a.png")).is_err());
        assert!(validate_image(Some(IMAGE)).is_ok());
        assert!(validate_chat_name(&"n".repeat(101)).is_err());
    }
}
