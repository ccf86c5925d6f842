use actix_web::error::{
    ErrorBadRequest, ErrorConflict, ErrorForbidden, ErrorInternalServerError, ErrorNotFound,
};
use actix_web::web::Json;
use actix_web::Error;
use serde_derive::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
pub(crate) struct JsonResponse<T> {
    pub(crate) status: String,
    pub(crate) message: String,
    pub(crate) code: u32,
    pub(crate) id: Option<Uuid>,
    pub(crate) item: Option<T>,
    pub(crate) list: Option<Vec<T>>,
}

#[derive(Serialize, Default)]
pub struct JsonResponseBuilder<T>
where
    T: serde::Serialize + Default,
{
    id: Option<Uuid>,
    item: Option<T>,
    list: Option<Vec<T>>,
}

impl<T> JsonResponse<T>
where
    T: serde::Serialize + Default,
{
    pub fn build() -> JsonResponseBuilder<T> {
        JsonResponseBuilder::default()
    }
}

impl<T> JsonResponseBuilder<T>
where
    T: serde::Serialize + Default,
{
    pub(crate) fn set_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub(crate) fn set_item(mut self, item: T) -> Self {
        self.item = Some(item);
        self
    }

    pub(crate) fn set_list(mut self, list: Vec<T>) -> Self {
        self.list = Some(list);
        self
    }

    fn to_json_response(self, status: String, message: String, code: u32) -> JsonResponse<T> {
        JsonResponse {
            status,
            message,
            code,
            id: self.id,
            item: self.item,
            list: self.list,
        }
    }

    pub(crate) fn ok<I: Into<String>>(self, msg: I) -> Json<JsonResponse<T>> {
        Json(self.to_json_response("OK".to_string(), msg.into(), 200))
    }

    pub(crate) fn created<I: Into<String>>(self, msg: I) -> Json<JsonResponse<T>> {
        Json(self.to_json_response("OK".to_string(), msg.into(), 201))
    }

    fn error_body(self, message: String, code: u32) -> String {
        let response = self.to_json_response("Error".to_string(), message, code);
        serde_json::to_string(&response).unwrap_or_default()
    }

    pub(crate) fn bad_request<I: Into<String>>(self, msg: I) -> Error {
        ErrorBadRequest(self.error_body(msg.into(), 400))
    }

    pub(crate) fn form_error<I: Into<String>>(self, msg: I) -> Error {
        ErrorBadRequest(self.error_body(msg.into(), 400))
    }

    pub(crate) fn forbidden<I: Into<String>>(self, msg: I) -> Error {
        ErrorForbidden(self.error_body(msg.into(), 403))
    }

    pub(crate) fn not_found<I: Into<String>>(self, msg: I) -> Error {
        ErrorNotFound(self.error_body(msg.into(), 404))
    }

    pub(crate) fn conflict<I: Into<String>>(self, msg: I) -> Error {
        ErrorConflict(self.error_body(msg.into(), 409))
    }

    pub(crate) fn internal_server_error<I: Into<String>>(self, msg: I) -> Error {
        let msg = msg.into();
        let msg = if msg.trim().is_empty() {
            "Internal Server Error".to_string()
        } else {
            msg
        };
        ErrorInternalServerError(self.error_body(msg, 500))
    }
}
