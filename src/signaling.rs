//! Обмен описаниями и кандидатами через хранилище сигнализации.
//!
//! Каждая роль пишет только свои поля: вызывающий владеет `offer` и
//! `offerCandidates`, вызываемый `answer` и `answerCandidates`. Поэтому
//! чтение-затем-запись здесь безопасно без транзакций хранилища.

use crate::error::{SignalingError, SignalingResult};
use crate::peer::types::{
    CallDocument, CallId, CandidateCollection, CandidateEntry, IceCandidate, Role, SdpType,
    SessionDescription,
};
use crate::store::{
    CallChangeHandler, CallUpdate, CandidateAddedHandler, SignalingStore, Subscription,
};
use tracing::{debug, info};

// ========== CALL RECORD ==========

pub async fn create_call(store: &dyn SignalingStore) -> SignalingResult<CallId> {
    let id = store.create_call().await?;
    info!("Created call {}", id);
    Ok(id)
}

pub async fn get_call(store: &dyn SignalingStore, id: &CallId) -> SignalingResult<CallDocument> {
    if id.is_empty() {
        return Err(SignalingError::not_found(id.as_str()));
    }
    store
        .get_call(id)
        .await?
        .ok_or_else(|| SignalingError::not_found(id.as_str()))
}

// ========== DESCRIPTIONS ==========

/// Сторона вызывающего. `AlreadySet`, если offer уже записан.
pub async fn write_offer(
    store: &dyn SignalingStore,
    id: &CallId,
    desc: SessionDescription,
) -> SignalingResult<()> {
    expect_type(&desc, SdpType::Offer)?;
    let call = get_call(store, id).await?;
    if call.offer.is_some() {
        return Err(SignalingError::AlreadySet {
            call_id: id.to_string(),
            field: "offer",
        });
    }
    store.update_call(id, CallUpdate::offer(desc)).await?;
    debug!("Offer written to call {}", id);
    Ok(())
}

/// Сторона вызываемого. Звонок должен существовать, иметь offer и не иметь answer.
pub async fn write_answer(
    store: &dyn SignalingStore,
    id: &CallId,
    desc: SessionDescription,
) -> SignalingResult<()> {
    expect_type(&desc, SdpType::Answer)?;
    let call = get_call(store, id).await?;
    if call.offer.is_none() {
        return Err(SignalingError::MissingOffer {
            call_id: id.to_string(),
        });
    }
    if call.answer.is_some() {
        return Err(SignalingError::AlreadySet {
            call_id: id.to_string(),
            field: "answer",
        });
    }
    store.update_call(id, CallUpdate::answer(desc)).await?;
    debug!("Answer written to call {}", id);
    Ok(())
}

fn expect_type(desc: &SessionDescription, expected: SdpType) -> SignalingResult<()> {
    if desc.sdp_type != expected {
        return Err(SignalingError::UnexpectedDescription {
            expected,
            found: desc.sdp_type,
        });
    }
    Ok(())
}

// ========== CANDIDATES ==========

/// Добавляет кандидат в коллекцию стороны `role`
pub async fn append_candidate(
    store: &dyn SignalingStore,
    id: &CallId,
    role: Role,
    candidate: IceCandidate,
) -> SignalingResult<CandidateEntry> {
    store
        .add_candidate(id, role.own_candidates(), candidate)
        .await
}

// ========== SUBSCRIPTIONS ==========

pub fn subscribe_to_call(
    store: &dyn SignalingStore,
    id: &CallId,
    on_change: CallChangeHandler,
) -> SignalingResult<Subscription> {
    store.subscribe_call(id, on_change)
}

pub fn subscribe_to_candidates(
    store: &dyn SignalingStore,
    id: &CallId,
    collection: CandidateCollection,
    on_added: CandidateAddedHandler,
) -> SignalingResult<Subscription> {
    store.subscribe_candidates(id, collection, on_added)
}
