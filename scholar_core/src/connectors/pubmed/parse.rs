use super::PubMedArticle;
use crate::error::ConnectorError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ESearchResponse {
    pub esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
pub struct ESearchResult {
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub idlist: Vec<String>,
    #[serde(default, rename = "ERROR")]
    pub error: Option<String>,
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn within(stack: &[String], name: &str) -> bool {
    stack.iter().any(|s| s == name)
}

fn append(target: &mut String, text: &str) {
    if !target.is_empty() && !target.ends_with(' ') {
        target.push(' ');
    }
    target.push_str(text);
}

#[derive(Default)]
struct AuthorParts {
    last: String,
    fore: String,
    collective: String,
}

/// Parse an efetch `PubmedArticleSet` document.
pub fn parse_efetch_document(xml: &str) -> Result<Vec<PubMedArticle>, ConnectorError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut articles = Vec::new();
    let mut article: Option<PubMedArticle> = None;
    let mut stack: Vec<String> = Vec::new();
    let mut author = AuthorParts::default();
    let mut abstract_part = String::new();
    let mut abstract_label: Option<String> = None;
    let mut id_type: Option<String> = None;
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "PubmedArticle" => article = Some(PubMedArticle::default()),
                    "Author" => author = AuthorParts::default(),
                    "AbstractText" => {
                        abstract_part.clear();
                        abstract_label = attr(e, b"Label");
                    }
                    "ELocationID" => id_type = attr(e, b"EIdType"),
                    "ArticleId" => id_type = attr(e, b"IdType"),
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let Some(current) = article.as_mut() else {
                    continue;
                };
                let text = e
                    .unescape()
                    .map_err(|err| ConnectorError::ParseError(err.to_string()))?
                    .to_string();
                let top = stack.last().map(String::as_str).unwrap_or("");
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .and_then(|i| stack.get(i))
                    .map(String::as_str)
                    .unwrap_or("");

                if within(&stack, "ReferenceList") || within(&stack, "CommentsCorrectionsList") {
                    // cited works carry their own ids
                } else if within(&stack, "ArticleTitle") {
                    append(&mut current.title, &text);
                } else if within(&stack, "AbstractText") {
                    append(&mut abstract_part, &text);
                } else {
                    match (parent, top) {
                        ("MedlineCitation", "PMID") => current.pmid = text,
                        ("Author", "LastName") => author.last = text,
                        ("Author", "ForeName") => author.fore = text,
                        ("Author", "CollectiveName") => author.collective = text,
                        ("Journal", "Title") => current.journal = Some(text),
                        ("PubDate", "Year") => current.pub_year = Some(text),
                        ("PubDate", "Month") => current.pub_month = Some(text),
                        ("PubDate", "Day") => current.pub_day = Some(text),
                        ("PubDate", "MedlineDate") => current.medline_date = Some(text),
                        ("KeywordList", "Keyword") => {
                            if !current.keywords.contains(&text) {
                                current.keywords.push(text);
                            }
                        }
                        (_, "ELocationID") | ("ArticleIdList", "ArticleId") => {
                            match id_type.as_deref() {
                                Some("doi") if current.doi.is_none() => current.doi = Some(text),
                                Some("pmc") if current.pmc_id.is_none() => {
                                    current.pmc_id = Some(text)
                                }
                                _ => {}
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.pop();
                if let Some(current) = article.as_mut() {
                    match name.as_str() {
                        "Author" if !within(&stack, "ReferenceList") => {
                            let full = if !author.collective.is_empty() {
                                author.collective.clone()
                            } else {
                                format!("{} {}", author.fore, author.last).trim().to_string()
                            };
                            if !full.is_empty() {
                                current.authors.push(full);
                            }
                        }
                        "AbstractText" if !abstract_part.is_empty() => {
                            let section = match abstract_label.take() {
                                Some(label) => format!("{}: {}", label, abstract_part),
                                None => abstract_part.clone(),
                            };
                            current.abstract_sections.push(section);
                        }
                        "ELocationID" | "ArticleId" => id_type = None,
                        _ => {}
                    }
                }
                if name == "PubmedArticle" {
                    if let Some(done) = article.take() {
                        if !done.pmid.is_empty() {
                            articles.push(done);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConnectorError::ParseError(e.to_string())),
            _ => {}
        }
    }

    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFETCH: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">31452104</PMID>
      <Article PubModel="Print-Electronic">
        <Journal>
          <JournalIssue CitedMedium="Internet">
            <PubDate><Year>2019</Year><Month>Aug</Month><Day>26</Day></PubDate>
          </JournalIssue>
          <Title>Nature</Title>
        </Journal>
        <ArticleTitle>Quantum supremacy using a <i>programmable</i> superconducting processor.</ArticleTitle>
        <ELocationID EIdType="pii" ValidYN="Y">S0028-0836</ELocationID>
        <ELocationID EIdType="doi" ValidYN="Y">10.1038/s41586-019-1666-5</ELocationID>
        <Abstract>
          <AbstractText Label="BACKGROUND">The promise of quantum computers &amp; more.</AbstractText>
          <AbstractText Label="RESULTS">Sycamore takes 200 seconds.</AbstractText>
        </Abstract>
        <AuthorList CompleteYN="Y">
          <Author ValidYN="Y"><LastName>Arute</LastName><ForeName>Frank</ForeName><Initials>F</Initials></Author>
          <Author ValidYN="Y"><CollectiveName>Google AI Quantum</CollectiveName></Author>
        </AuthorList>
      </Article>
      <KeywordList Owner="NOTNLM"><Keyword MajorTopicYN="N">qubits</Keyword></KeywordList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">31452104</ArticleId>
        <ArticleId IdType="pmc">PMC6800000</ArticleId>
      </ArticleIdList>
      <ReferenceList>
        <Reference>
          <Citation>Some cited work.</Citation>
          <ArticleIdList><ArticleId IdType="doi">10.9999/cited</ArticleId></ArticleIdList>
        </Reference>
      </ReferenceList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">10000001</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue>
          <Title>Old Journal</Title>
        </Journal>
        <ArticleTitle>Older work.</ArticleTitle>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList><ArticleId IdType="doi">10.1000/old</ArticleId></ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_efetch_document() {
        let articles = parse_efetch_document(EFETCH).unwrap();
        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.pmid, "31452104");
        assert_eq!(
            first.title,
            "Quantum supremacy using a programmable superconducting processor."
        );
        assert_eq!(first.authors, vec!["Frank Arute", "Google AI Quantum"]);
        assert_eq!(first.journal.as_deref(), Some("Nature"));
        assert_eq!(first.doi.as_deref(), Some("10.1038/s41586-019-1666-5"));
        assert_eq!(first.pmc_id.as_deref(), Some("PMC6800000"));
        assert_eq!(first.keywords, vec!["qubits"]);
        assert_eq!(
            first.abstract_sections,
            vec![
                "BACKGROUND: The promise of quantum computers & more.",
                "RESULTS: Sycamore takes 200 seconds."
            ]
        );
        assert_eq!(first.pub_date_string().as_deref(), Some("2019 Aug 26"));

        let second = &articles[1];
        assert_eq!(second.doi.as_deref(), Some("10.1000/old"));
        assert_eq!(second.pub_date_string().as_deref(), Some("1998 Dec-1999 Jan"));
    }

    #[test]
    fn test_parse_esearch() {
        let body = r#"{"header":{"type":"esearch"},"esearchresult":{"count":"2","retmax":"2","idlist":["31452104","10000001"]}}"#;
        let parsed: ESearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.esearchresult.idlist, vec!["31452104", "10000001"]);
        assert_eq!(parsed.esearchresult.count.as_deref(), Some("2"));
    }
}
