use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::backend::LineBackend;
use crate::error::AppError;
use crate::hub::PropertyHub;
use crate::manager::LineManager;
use crate::pins::PinTable;
use crate::property::{
    PropValuePool, PropertyValue, RawValue, ValuePool, ValueType, VehicleClient, areas,
};

pub struct AppState<B: LineBackend> {
    pub manager: Arc<Mutex<LineManager<B>>>,
    pub table: Arc<PinTable>,
    pub hub: Arc<PropertyHub>,
}

impl<B: LineBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            table: Arc::clone(&self.table),
            hub: Arc::clone(&self.hub),
        }
    }
}

#[derive(Deserialize)]
struct WritePayload {
    area_id: Option<i32>,
    #[serde(default)]
    int32_values: Vec<i32>,
    #[serde(default)]
    float_values: Vec<f32>,
}

async fn handle_update_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<PropertyValue>,
) {
    let mut updates = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            update = updates.next() => {
                let Some(update) = update else { break; };

                match update {
                    Ok(value) => {
                        if let Ok(text) = serde_json::to_string(&value) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(AppError::Gpio(format!("Update stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: LineBackend> AppState<B> {
    pub fn new(manager: LineManager<B>, hub: Arc<PropertyHub>) -> Self {
        Self {
            table: Arc::clone(manager.table()),
            manager: Arc::new(Mutex::new(manager)),
            hub,
        }
    }

    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/groups")
                    .route(web::get().to(list_groups::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/properties")
                    .route(web::get().to(list_properties::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/properties/events")
                    .route(web::get().to(updates_ws::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/property/{prop_id}")
                    .route(web::get().to(get_property::<B>))
                    .route(web::post().to(set_property::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_groups<B: LineBackend>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    // the poller holds the lock across blocking pin reads
    let manager = Arc::clone(&state.manager);
    let groups = web::block(move || manager.lock().groups())
        .await
        .map_err(|e| AppError::Gpio(format!("group snapshot task: {e}")))?;

    Ok(web::Json(groups))
}

async fn list_properties<B: LineBackend>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.hub.snapshot()))
}

async fn get_property<B: LineBackend>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let prop = parse_prop_id(&req)?;
    if !state.table.contains(prop) {
        return Err(AppError::NotHandled(prop));
    }

    let values = state.hub.latest(prop);
    if values.is_empty() {
        Ok(HttpResponse::Ok().finish())
    } else {
        Ok(HttpResponse::Ok().json(values))
    }
}

async fn set_property<B: LineBackend>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let prop = parse_prop_id(&req)?;
    let value = parse_write_payload(prop, &state.table, &body)?;

    let manager = Arc::clone(&state.manager);
    let written = value.clone();
    web::block(move || manager.lock().write(&written))
        .await
        .map_err(|e| AppError::Gpio(format!("write task: {e}")))??;
    state.hub.set_property(&value, true);

    Ok(HttpResponse::Ok())
}

async fn updates_ws<B: LineBackend>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.hub.subscribe();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_update_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_prop_id(req: &HttpRequest) -> Result<i32, AppError> {
    let raw = req
        .match_info()
        .get("prop_id")
        .ok_or_else(|| AppError::InvalidValue("Missing property id".into()))?;

    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => raw.parse::<i32>(),
    };
    parsed.map_err(|_| AppError::InvalidValue("Invalid property id".into()))
}

fn parse_write_payload(
    prop: i32,
    table: &PinTable,
    body: &[u8],
) -> Result<PropertyValue, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty property payload".into()));
    }

    let payload: WritePayload = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid property payload: {e}")))?;

    let mut value = ValuePool.obtain(ValueType::Int32);
    value.prop = prop;
    // without an explicit area, address the output group's own area
    value.area_id = match payload.area_id {
        Some(area_id) => area_id,
        None => table
            .output(prop)
            .and_then(|(_, group)| group.area_id)
            .unwrap_or(areas::GLOBAL),
    };
    value.value = RawValue {
        int32_values: payload.int32_values,
        float_values: payload.float_values,
    };
    Ok(value)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
