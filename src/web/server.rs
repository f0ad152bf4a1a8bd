use std::io::Read;
use std::sync::Arc;

use parking_lot::RwLock;
use tiny_http::{Header, Method, Response, Server};

use crate::web::{HttpReply, HttpRequest, Result, RouteHandler, RouteRegistrar, WebError};

struct Route {
    method: Method,
    path: String,
    handler: Arc<RouteHandler>,
}

/// Route table plus a tiny_http listener
pub struct WebServer {
    routes: RwLock<Vec<Route>>,
}

impl Default for WebServer {
    fn default() -> Self {
        WebServer::new()
    }
}

impl RouteRegistrar for WebServer {
    fn register(&self, method: Method, path: &str, handler: RouteHandler) {
        log::debug!("HTTP route registered: {:?} {}", method, path);

        let mut routes = self.routes.write();
        routes.retain(|route| !(route.method == method && route.path == path));
        routes.push(Route {
            method,
            path: path.to_string(),
            handler: Arc::new(handler),
        });
    }
}

impl WebServer {
    pub fn new() -> WebServer {
        WebServer {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Find the handler for a request and run it
    pub fn dispatch(&self, request: &HttpRequest) -> Result<HttpReply> {
        let path = request.url.split('?').next().unwrap_or("");

        let handler = self
            .routes
            .read()
            .iter()
            .find(|route| route.method == request.method && route.path == path)
            .map(|route| route.handler.clone())
            .ok_or(WebError::NotFound)?;

        Ok((*handler)(request))
    }

    fn read_request(request: &mut tiny_http::Request) -> Result<HttpRequest> {
        let mut body = Vec::new();
        request.as_reader().read_to_end(&mut body)?;

        Ok(HttpRequest {
            method: request.method().clone(),
            url: request.url().to_string(),
            body,
        })
    }

    /// Handle a single HTTP request
    fn handle_request(&self, mut request: tiny_http::Request) {
        log::info!("HTTP {:?} {:?}", request.method(), request.url());

        let reply = match WebServer::read_request(&mut request).and_then(|x| self.dispatch(&x)) {
            Ok(reply) => reply,
            Err(WebError::NotFound) => HttpReply::error(404, "Not found".to_string()),
            Err(err) => {
                log::info!("Request failed: {:?}", err);
                HttpReply::error(500, err.to_string())
            }
        };

        if let Err(err) = request.respond(WebServer::to_response(reply)) {
            log::info!("Failed to write response to client: {:?}", err);
        }
    }

    fn to_response(reply: HttpReply) -> Response<std::io::Cursor<Vec<u8>>> {
        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        if let Some(content_type) = reply.content_type {
            if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
                response.add_header(header);
            }
        }
        response
    }

    /// Serve requests until the listener fails
    pub fn run_webserver(&self, port: u16) {
        let webserver = match Server::http(("0.0.0.0", port)) {
            Ok(x) => x,
            Err(e) => {
                log::error!("Failed to start HTTP web server: {:?}", e);
                return;
            }
        };

        log::info!("HTTP web server started and listening on port {}", port);

        for request in webserver.incoming_requests() {
            self.handle_request(request);
        }
    }
}
