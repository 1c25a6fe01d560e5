use actix_web::{get, post, web, HttpResponse, Responder};
use jsonrpc_core::{Params, Value};
use jsonrpc_core_client::RpcError;
use lbmatch_rpc::control_rpc::ControlRpcClient;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{mpsc::Sender, Arc};

// New endpoints have to be added as a service for actix server. Look at super::control_panel::start_server()

type SharedClient = Arc<Mutex<Option<ControlRpcClient>>>;

#[get("/health")]
pub(super) async fn health(client: web::Data<SharedClient>) -> impl Responder {
    with_client(&client, |client| client.health()).await
}

#[post("/stop")]
pub(super) async fn stop(
    server_stopper_tx: web::Data<Sender<()>>,
    client: web::Data<SharedClient>,
) -> impl Responder {
    if let Err(error) = server_stopper_tx.send(()) {
        let err_message = format!("Unable to send signal to stop actix server: {}", error);
        log::error!("{}", err_message);
        return HttpResponse::InternalServerError().body(err_message);
    }

    with_client(&client, |client| client.stop()).await
}

#[get("/config")]
pub(super) async fn get_config(client: web::Data<SharedClient>) -> impl Responder {
    with_client(&client, |client| client.get_config()).await
}

#[post("/config")]
pub(super) async fn set_config(
    body: web::Bytes,
    client: web::Data<SharedClient>,
) -> impl Responder {
    let settings = match String::from_utf8((&body).to_vec()) {
        Ok(settings) => settings,
        Err(err) => {
            return HttpResponse::BadRequest().body(format!(
                "Failed to convert input settings({:?}) to str: {}",
                body,
                err.to_string(),
            ))
        }
    };

    let params = Params::Array(vec![Value::String(settings)]);
    with_client(&client, |client| client.set_config(params)).await
}

#[get("/stats")]
pub(super) async fn stats(client: web::Data<SharedClient>) -> impl Responder {
    with_client(&client, |client| client.stats()).await
}

async fn with_client<F, Fut>(client: &SharedClient, call: F) -> HttpResponse
where
    F: FnOnce(ControlRpcClient) -> Fut,
    Fut: Future<Output = Result<Value, RpcError>>,
{
    let client = match client.lock().clone() {
        Some(client) => client,
        None => return HttpResponse::ServiceUnavailable().body("not connected to core IPC server"),
    };

    send_request(call(client)).await
}

fn handle_rpc_error(error: RpcError) -> HttpResponse {
    match error {
        RpcError::JsonRpcError(error) => {
            HttpResponse::InternalServerError().body(error.to_string())
        }
        RpcError::ParseError(msg, error) => HttpResponse::BadRequest().body(format!(
            "Failed to parse '{}': {}",
            msg,
            error.to_string()
        )),
        RpcError::Timeout => HttpResponse::RequestTimeout().body("Request Timeout"),
        RpcError::Client(msg) => HttpResponse::InternalServerError().body(msg),
        RpcError::Other(error) => HttpResponse::InternalServerError().body(error.to_string()),
    }
}

async fn send_request(request: impl Future<Output = Result<Value, RpcError>>) -> HttpResponse {
    match request.await {
        Ok(response) => HttpResponse::Ok().body(response.to_string()),
        Err(err) => handle_rpc_error(err),
    }
}
