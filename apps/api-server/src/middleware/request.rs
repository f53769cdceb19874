//! Translate actix requests into the transport-neutral descriptor the
//! defense components consume.

use actix_web::{HttpMessage, HttpRequest, web};

use bulwark_core::domain::{Identity, RequestDescriptor};

pub fn describe(req: &HttpRequest) -> RequestDescriptor {
    let mut descriptor = RequestDescriptor::new(req.method().as_str(), req.path());

    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            descriptor.insert_header(name.as_str(), value);
        }
    }

    if !req.query_string().is_empty() {
        match web::Query::<Vec<(String, String)>>::from_query(req.query_string()) {
            Ok(query) => descriptor.query = query.into_inner(),
            // Undecodable pairs are still scanned as raw text.
            Err(_) => descriptor.query = vec![(String::new(), req.query_string().to_string())],
        }
    }

    if let Some(peer) = req.peer_addr() {
        descriptor.peer_addr = Some(peer.to_string());
    }

    descriptor.identity = req.extensions().get::<Identity>().cloned();
    descriptor
}
