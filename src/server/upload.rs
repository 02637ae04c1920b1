use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ingest::{parse_receiver_ids, UploadRequest, UploadedFile};
use crate::service::RelayService;
use crate::transfer::TransferStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UploadResponse {
    transfer_id: String,
    file_name: String,
    size: u64,
    status: TransferStatus,
}

pub(super) async fn handle_upload(
    State(service): State<RelayService>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, Response> {
    let request = read_form(multipart).await?;
    let accepted = service
        .accept_upload(request)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(UploadResponse {
        transfer_id: accepted.summary.transfer_id,
        file_name: accepted.summary.file_name,
        size: accepted.summary.size,
        status: accepted.summary.status,
    }))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadRequest, Response> {
    let mut request = UploadRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(IntoResponse::into_response)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let mime_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(IntoResponse::into_response)?;
                request.file = Some(UploadedFile {
                    file_name,
                    mime_type,
                    bytes,
                });
            }
            "senderId" => {
                request.sender_id = field.text().await.map_err(IntoResponse::into_response)?;
            }
            "receiverIds" => {
                let raw = field.text().await.map_err(IntoResponse::into_response)?;
                for id in parse_receiver_ids(&raw) {
                    if !request.receiver_ids.contains(&id) {
                        request.receiver_ids.push(id);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(request)
}
