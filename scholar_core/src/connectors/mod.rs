pub mod http;

#[cfg(feature = "arxiv")]
pub mod arxiv;
#[cfg(feature = "crossref")]
pub mod crossref;
#[cfg(feature = "pubmed")]
pub mod pubmed;
#[cfg(feature = "semantic-scholar")]
pub mod semantic_scholar;

pub use http::{HttpTransport, RetryPolicy, USER_AGENT};

use crate::query::StructuredQuery;
use crate::record::ResultRecord;

/// Relevance a source implies by returning a record at 1-based `rank`.
pub fn reciprocal_rank(rank: usize) -> f64 {
    1.0 / rank.max(1) as f64
}

/// Apply the parts of `query` a source's API cannot express: excluded terms
/// (title/abstract) and the author substring. Relevance is reassigned from
/// the surviving order.
pub(crate) fn refine_client_side(
    records: Vec<ResultRecord>,
    query: &StructuredQuery,
    max_results: usize,
) -> Vec<ResultRecord> {
    let excluded: Vec<String> = query
        .excluded_terms()
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    let author = query.filters.author.as_ref().map(|a| a.to_lowercase());

    records
        .into_iter()
        .filter(|record| {
            let text = format!(
                "{} {}",
                record.title,
                record.abstract_text().unwrap_or_default()
            )
            .to_lowercase();
            !excluded.iter().any(|term| text.contains(term.as_str()))
        })
        .filter(|record| match &author {
            Some(author) => record.authors.to_lowercase().contains(author.as_str()),
            None => true,
        })
        .take(max_results)
        .enumerate()
        .map(|(i, record)| record.with_relevance(reciprocal_rank(i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::record::{ScholarlyFields, SourceTag};

    fn record(title: &str, authors: &str, abstract_text: &str) -> ResultRecord {
        ResultRecord::new(SourceTag::Crossref, title, title)
            .with_authors(authors)
            .with_scholarly(ScholarlyFields {
                abstract_text: Some(abstract_text.to_string()),
                ..Default::default()
            })
    }

    #[test]
    fn test_reciprocal_rank() {
        assert_eq!(reciprocal_rank(1), 1.0);
        assert_eq!(reciprocal_rank(4), 0.25);
        assert_eq!(reciprocal_rank(0), 1.0);
    }

    #[test]
    fn test_refine_client_side() {
        let records = vec![
            record("Mouse models of sepsis", "Ada Smith", ""),
            record("Human sepsis cohort", "Bob Jones", "no rodents"),
            record("Sepsis in ICU", "Carol Smithers", "a MOUSE appears"),
            record("Sepsis outcomes", "Dan Smith", ""),
        ];
        let query = parse("sepsis -mouse author:smith").unwrap();
        let refined = refine_client_side(records, &query, 10);
        let titles: Vec<&str> = refined.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Sepsis outcomes"]);
        assert_eq!(refined[0].relevance, 1.0);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted local HTTP server for connector tests.

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    pub(crate) struct MockServer {
        addr: SocketAddr,
        hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl MockServer {
        /// Serve `responses` in order, one per connection; 500 once exhausted.
        pub(crate) async fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let requests = Arc::new(Mutex::new(Vec::new()));

            let server_hits = Arc::clone(&hits);
            let server_requests = Arc::clone(&requests);
            tokio::spawn(async move {
                let mut responses = responses.into_iter();
                while let Ok((mut stream, _)) = listener.accept().await {
                    let request = read_request(&mut stream).await;
                    let (status, body) = responses.next().unwrap_or((500, String::new()));
                    let is_head = request.starts_with("HEAD");
                    server_requests.lock().unwrap().push(request);
                    server_hits.fetch_add(1, Ordering::SeqCst);

                    let mut reply = format!(
                        "HTTP/1.1 {} Scripted\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    if !is_head {
                        reply.push_str(&body);
                    }
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });

            Self {
                addr,
                hits,
                requests,
            }
        }

        pub(crate) fn domain(&self) -> String {
            self.addr.to_string()
        }

        pub(crate) fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        pub(crate) fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        /// Raw request heads received so far (request line plus headers).
        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// URL of a local port nothing is listening on.
    pub(crate) async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/", addr)
    }
}
