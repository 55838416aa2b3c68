//! A minimal in-process tus server for tests.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use reqwest::Url;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader},
    net::{TcpListener, TcpStream},
};

use crate::transport::TUS_VERSION;

#[derive(Default)]
struct Stored {
    length: u64,
    data: Vec<u8>,
    metadata: Option<String>,
    patches: usize,
}

#[derive(Default)]
struct State {
    uploads: HashMap<String, Stored>,
    next_id: u64,
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

pub(crate) struct TusServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl TusServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}/files", self.addr)
    }

    fn with_upload<T>(&self, url: &str, f: impl FnOnce(&Stored) -> T) -> Option<T> {
        let path = Url::parse(url).ok()?.path().to_string();
        self.state.lock().unwrap().uploads.get(&path).map(f)
    }

    pub(crate) fn data(&self, url: &str) -> Option<Vec<u8>> {
        self.with_upload(url, |u| u.data.clone())
    }

    pub(crate) fn metadata(&self, url: &str) -> Option<String> {
        self.with_upload(url, |u| u.metadata.clone()).flatten()
    }

    pub(crate) fn patches(&self, url: &str) -> usize {
        self.with_upload(url, |u| u.patches).unwrap_or(0)
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut reader = BufReader::new(stream);
    while let Some(request) = read_request(&mut reader).await {
        let (status, headers) = respond(&request, &state);

        let mut response = format!("HTTP/1.1 {} Status\r\n", status);
        for (name, value) in headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        if status != 204 {
            response.push_str("Content-Length: 0\r\n");
        }
        response.push_str("\r\n");

        if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Request> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

fn respond(request: &Request, state: &Mutex<State>) -> (u16, Vec<(&'static str, String)>) {
    if request.headers.get("tus-resumable").map(String::as_str) != Some(TUS_VERSION) {
        return (412, Vec::new());
    }

    let mut state = state.lock().unwrap();
    match request.method.as_str() {
        "POST" => {
            let Some(length) = request
                .headers
                .get("upload-length")
                .and_then(|v| v.parse().ok())
            else {
                return (400, Vec::new());
            };
            state.next_id += 1;
            let path = format!("{}/{}", request.path, state.next_id);
            state.uploads.insert(
                path.clone(),
                Stored {
                    length,
                    metadata: request.headers.get("upload-metadata").cloned(),
                    ..Default::default()
                },
            );
            (201, vec![("Location", path)])
        }
        "HEAD" => match state.uploads.get(&request.path) {
            Some(upload) => (
                200,
                vec![
                    ("Upload-Offset", upload.data.len().to_string()),
                    ("Upload-Length", upload.length.to_string()),
                ],
            ),
            None => (404, Vec::new()),
        },
        "PATCH" => {
            let Some(upload) = state.uploads.get_mut(&request.path) else {
                return (404, Vec::new());
            };
            let offset: Option<u64> = request
                .headers
                .get("upload-offset")
                .and_then(|v| v.parse().ok());
            if offset != Some(upload.data.len() as u64) {
                return (409, Vec::new());
            }
            if (upload.data.len() + request.body.len()) as u64 > upload.length {
                return (413, Vec::new());
            }
            upload.data.extend_from_slice(&request.body);
            upload.patches += 1;
            (204, vec![("Upload-Offset", upload.data.len().to_string())])
        }
        _ => (405, Vec::new()),
    }
}
