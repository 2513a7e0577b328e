//! Link-aggregator platform (reddit.com)
//!
//! Query tokens `community/<name>`, `r/<name>`, `community:<name>` and
//! `subreddit:<name>` become community filters; everything else is a
//! keyword. Post pages render comments as nested `<shreddit-comment>`
//! elements, harvested depth-first by [`parse_comment_tree`].

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{ElementRef, Html};

use super::{
    PlatformComment, PlatformOptions, PlatformPost, PlatformScraper, PostKind, absolute_link,
    attr_in, selector, text_in,
};
use crate::browser::{PageDriver, stabilize};
use crate::utils::retry::{Attempt, EXPAND_POLICY, retry_until};
use crate::web_search::types::{Platform, SearchQuery};

const BASE: &str = "https://www.reddit.com/";
const ITEM: &str = "shreddit-post, div[data-testid='search-post-unit']";
const COMMENT: &str = "shreddit-comment";

/// Keywords and community filters pulled out of a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedditQuery {
    pub communities: Vec<String>,
    pub keywords: Vec<String>,
}

impl RedditQuery {
    pub fn parse(query: &SearchQuery) -> Self {
        let mut parsed = RedditQuery::default();
        for token in query.keywords().iter().flat_map(|k| k.split_whitespace()) {
            match community_token(token) {
                Some(name) => {
                    if !parsed.communities.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                        parsed.communities.push(name.to_string());
                    }
                }
                None => parsed.keywords.push(token.to_string()),
            }
        }
        parsed
    }

    /// Search or listing URL for this query
    pub fn url(&self) -> String {
        let keywords = self.keywords.join(" ");
        match self.communities.as_slice() {
            [] => format!("{BASE}search/?q={}", urlencoding::encode(&keywords)),
            [community] if keywords.is_empty() => format!("{BASE}r/{community}/"),
            [community] => format!(
                "{BASE}r/{community}/search/?q={}&restrict_sr=1",
                urlencoding::encode(&keywords)
            ),
            several => {
                let filter = several
                    .iter()
                    .map(|c| format!("subreddit:{c}"))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                let q = if keywords.is_empty() {
                    format!("({filter})")
                } else {
                    format!("({filter}) {keywords}")
                };
                format!("{BASE}search/?q={}", urlencoding::encode(&q))
            }
        }
    }
}

fn community_token(token: &str) -> Option<&str> {
    let lower = token.to_ascii_lowercase();
    let prefix_len = ["community/", "community:", "subreddit:", "r/", "/r/"]
        .iter()
        .find(|prefix| lower.starts_with(*prefix))
        .map(|prefix| prefix.len())?;
    let name = token[prefix_len..].trim_end_matches('/');
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

pub struct RedditScraper;

#[async_trait]
impl PlatformScraper for RedditScraper {
    fn platform(&self) -> Platform {
        Platform::Linkaggregator
    }

    fn items_per_page(&self) -> usize {
        25
    }

    fn login_url(&self) -> &'static str {
        "https://www.reddit.com/login/"
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        RedditQuery::parse(query).url()
    }

    fn item_selector(&self) -> &'static str {
        ITEM
    }

    fn no_results_selector(&self) -> &'static str {
        "[data-testid='search-no-results'], #no-results"
    }

    fn parse_posts(&self, html: &str) -> Vec<PlatformPost> {
        let document = Html::parse_document(html);
        let Some(items) = selector(ITEM) else {
            return Vec::new();
        };
        document
            .select(&items)
            .filter_map(|item| {
                if item.value().name() == "shreddit-post" {
                    parse_shreddit_post(item)
                } else {
                    parse_search_unit(item)
                }
            })
            .collect()
    }

    /// Opens the post page and harvests its comment tree
    async fn expand(
        &self,
        page: &dyn PageDriver,
        post: &mut PlatformPost,
        options: &PlatformOptions,
    ) -> Result<()> {
        page.goto(&post.link).await?;
        stabilize::wait_for_stable(page).await;

        let html = retry_until(EXPAND_POLICY, "comment_tree", move |_| async move {
            let html = page.html().await?;
            Ok(if html.contains("<shreddit-comment") {
                Attempt::Ready(html)
            } else {
                Attempt::NotYet
            })
        })
        .await
        .ok_or_else(|| anyhow!("no comments rendered"))?;

        let thread = parse_thread(&html, options.max_comments);
        if let Some(thread) = thread {
            if post.content.is_empty() {
                post.content = thread.content;
            }
            post.comments = thread.comments;
        } else {
            post.comments = parse_comment_tree(&html, options.max_comments);
        }
        Ok(())
    }
}

fn parse_shreddit_post(item: ElementRef<'_>) -> Option<PlatformPost> {
    let attrs = item.value();
    let permalink = attrs.attr("permalink").or_else(|| attrs.attr("content-href"))?;
    let mut post = PlatformPost::new(PostKind::Post, absolute_link(BASE, permalink)?);
    post.title = attrs
        .attr("post-title")
        .map(str::to_string)
        .or_else(|| text_in(item, &["[slot='title']"]));
    post.author = attrs.attr("author").unwrap_or_default().to_string();
    post.publish_time = attrs.attr("created-timestamp").unwrap_or_default().to_string();
    post.content = text_in(item, &["[slot='text-body']"]).unwrap_or_default();
    post.engage("score", attrs.attr("score").map(str::to_string));
    post.engage("comments", attrs.attr("comment-count").map(str::to_string));
    post.engage(
        "community",
        attrs.attr("subreddit-prefixed-name").map(str::to_string),
    );
    Some(post)
}

fn parse_search_unit(item: ElementRef<'_>) -> Option<PlatformPost> {
    let href = attr_in(item, "a[data-testid='post-title']", "href")?;
    let mut post = PlatformPost::new(PostKind::Post, absolute_link(BASE, &href)?);
    post.title = text_in(item, &["a[data-testid='post-title']"]);
    post.publish_time = attr_in(item, "faceplate-timeago", "ts").unwrap_or_default();
    post.engage(
        "community",
        text_in(item, &["a[data-testid='subreddit-name']"]),
    );
    let counts = selector("faceplate-number")
        .map(|sel| {
            item.select(&sel)
                .filter_map(|n| n.value().attr("number").map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let mut counts = counts.into_iter();
    post.engage("score", counts.next());
    post.engage("comments", counts.next());
    Some(post)
}

/// The post and its comments from a post page
pub fn parse_thread(html: &str, max_comments: usize) -> Option<PlatformPost> {
    let document = Html::parse_document(html);
    let sel = selector("shreddit-post")?;
    let mut post = parse_shreddit_post(document.select(&sel).next()?)?;
    post.comments = comments_under(document.root_element(), max_comments);
    Some(post)
}

/// Top-level comments (at most `max_comments`) with their full reply trees
pub fn parse_comment_tree(html: &str, max_comments: usize) -> Vec<PlatformComment> {
    let document = Html::parse_document(html);
    comments_under(document.root_element(), max_comments)
}

fn comments_under(root: ElementRef<'_>, max_comments: usize) -> Vec<PlatformComment> {
    let mut comments = Vec::new();
    collect_comments(root, &mut comments);
    comments.truncate(max_comments);
    comments
}

/// Depth-first: every `shreddit-comment` whose nearest comment ancestor is
/// the node we started from lands in `out`
fn collect_comments(node: ElementRef<'_>, out: &mut Vec<PlatformComment>) {
    for child in node.children().filter_map(ElementRef::wrap) {
        if child.value().name() == COMMENT {
            out.push(build_comment(child));
        } else {
            collect_comments(child, out);
        }
    }
}

fn build_comment(element: ElementRef<'_>) -> PlatformComment {
    let attrs = element.value();
    let author = attrs.attr("author").unwrap_or("[deleted]").to_string();
    let author_link =
        (author != "[deleted]").then(|| format!("{BASE}user/{author}/"));

    let mut replies = Vec::new();
    collect_comments(element, &mut replies);

    PlatformComment {
        content: own_text(element, "div[slot='comment']"),
        time: own_attr(element, "faceplate-timeago", "ts").unwrap_or_default(),
        like_count: attrs.attr("score").unwrap_or_default().to_string(),
        author,
        author_link,
        replies,
    }
}

/// First match of `css` that belongs to `comment` itself and not a reply
fn own_match<'a>(comment: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = selector(css)?;
    comment.select(&sel).find(|candidate| {
        candidate
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == COMMENT)
            .is_some_and(|nearest| nearest.id() == comment.id())
    })
}

fn own_text(comment: ElementRef<'_>, css: &str) -> String {
    own_match(comment, css)
        .map(|node| {
            node.text()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn own_attr(comment: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    own_match(comment, css)
        .and_then(|node| node.value().attr(attr))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    fn query(raw: &str) -> SearchQuery {
        SearchQuery::new([raw], 1, Platform::Linkaggregator).unwrap()
    }

    #[test]
    fn community_prefix_scopes_the_search() {
        let parsed = RedditQuery::parse(&query("community/golang error handling"));

        assert_eq!(parsed.communities, ["golang"]);
        assert_eq!(parsed.keywords, ["error", "handling"]);
        assert_eq!(
            parsed.url(),
            "https://www.reddit.com/r/golang/search/?q=error%20handling&restrict_sr=1"
        );
    }

    #[test]
    fn several_communities_use_boolean_or() {
        let parsed = RedditQuery::parse(&query("r/rust subreddit:golang async"));
        assert_eq!(parsed.communities, ["rust", "golang"]);
        assert_eq!(
            parsed.url(),
            "https://www.reddit.com/search/?q=%28subreddit%3Arust%20OR%20subreddit%3Agolang%29%20async"
        );
    }

    #[test]
    fn bare_community_is_a_listing_and_keywords_are_site_wide() {
        assert_eq!(
            RedditQuery::parse(&query("community:rust")).url(),
            "https://www.reddit.com/r/rust/"
        );
        assert_eq!(
            RedditQuery::parse(&query("borrow checker")).url(),
            "https://www.reddit.com/search/?q=borrow%20checker"
        );
        // not a valid community name, stays a keyword
        assert_eq!(
            RedditQuery::parse(&query("r/ c++")).keywords,
            ["r/", "c++"]
        );
    }

    #[test]
    fn parses_listing_and_search_layouts() {
        let html = r#"
            <shreddit-post permalink="/r/golang/comments/abc/errors_are_values/" post-title="Errors are values"
                author="gopher" score="120" comment-count="33" created-timestamp="2024-02-01T10:00:00+0000"
                subreddit-prefixed-name="r/golang">
              <div slot="text-body"><p>Discuss.</p></div>
            </shreddit-post>
            <div data-testid="search-post-unit">
              <a data-testid="subreddit-name" href="/r/rust/">r/rust</a>
              <faceplate-timeago ts="2024-03-01T00:00:00Z"></faceplate-timeago>
              <a data-testid="post-title" href="/r/rust/comments/def/anyhow_vs_thiserror/">anyhow vs thiserror</a>
              <faceplate-number number="87"></faceplate-number> votes
              <faceplate-number number="12"></faceplate-number> comments
            </div>
        "#;
        let posts = RedditScraper.parse_posts(html);

        assert_eq!(posts.len(), 2);
        assert_eq!(
            posts[0].link,
            "https://www.reddit.com/r/golang/comments/abc/errors_are_values/"
        );
        assert_eq!(posts[0].title.as_deref(), Some("Errors are values"));
        assert_eq!(posts[0].content, "Discuss.");
        assert_eq!(posts[0].engagement.get("comments").map(String::as_str), Some("33"));
        assert_eq!(posts[1].title.as_deref(), Some("anyhow vs thiserror"));
        assert_eq!(posts[1].engagement.get("score").map(String::as_str), Some("87"));
        assert_eq!(posts[1].engagement.get("community").map(String::as_str), Some("r/rust"));
    }

    const THREAD: &str = r#"
        <shreddit-post permalink="/r/golang/comments/abc/errors/" post-title="Errors" author="op">
          <div slot="text-body">How do you wrap errors?</div>
        </shreddit-post>
        <shreddit-comment-tree>
          <shreddit-comment author="alice" score="10" depth="0">
            <div slot="commentMeta"><faceplate-timeago ts="2024-02-01T11:00:00Z"></faceplate-timeago></div>
            <div slot="comment"><p>Use fmt.Errorf with %w.</p></div>
            <shreddit-comment author="bob" score="4" depth="1">
              <div slot="comment"><p>And errors.Is to check.</p></div>
              <shreddit-comment depth="2">
                <div slot="comment"><p>[removed]</p></div>
              </shreddit-comment>
            </shreddit-comment>
          </shreddit-comment>
          <shreddit-comment author="carol" score="2" depth="0">
            <div slot="comment"><p>Sentinel errors.</p><p>Sparingly.</p></div>
          </shreddit-comment>
        </shreddit-comment-tree>
    "#;

    #[test]
    fn comment_tree_is_harvested_depth_first() {
        let comments = parse_comment_tree(THREAD, 20);

        assert_eq!(comments.len(), 2);
        let alice = &comments[0];
        assert_eq!(alice.author, "alice");
        assert_eq!(alice.content, "Use fmt.Errorf with %w.");
        assert_eq!(alice.time, "2024-02-01T11:00:00Z");
        assert_eq!(alice.like_count, "10");
        assert_eq!(
            alice.author_link.as_deref(),
            Some("https://www.reddit.com/user/alice/")
        );
        assert_eq!(alice.total(), 3);

        let bob = &alice.replies[0];
        assert_eq!(bob.content, "And errors.Is to check.");
        assert!(bob.time.is_empty());
        assert_eq!(bob.replies[0].author, "[deleted]");
        assert_eq!(bob.replies[0].author_link, None);

        assert_eq!(comments[1].content, "Sentinel errors.\nSparingly.");
        assert_eq!(parse_comment_tree(THREAD, 1).len(), 1);
    }

    #[test]
    fn thread_carries_post_body_and_comments() {
        let thread = parse_thread(THREAD, 20).unwrap();
        assert_eq!(thread.content, "How do you wrap errors?");
        assert_eq!(thread.comments.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expand_visits_post_and_attaches_comments() {
        let page = FakePage::with_html(THREAD);
        let mut post = PlatformPost::new(PostKind::Post, "https://www.reddit.com/r/golang/comments/abc/errors/");

        RedditScraper
            .expand(&page, &mut post, &PlatformOptions::default())
            .await
            .unwrap();

        assert_eq!(page.gotos(), vec![post.link.clone()]);
        assert_eq!(post.content, "How do you wrap errors?");
        assert_eq!(post.comments.len(), 2);
    }
}
