//! Microblog platform (s.weibo.com)

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde_json::Value;

use super::{
    Pagination, PlatformComment, PlatformOptions, PlatformPost, PlatformScraper, PostKind,
    absolute_link, attr_in, locate_item, selector, text_in,
};
use crate::browser::PageDriver;
use crate::utils::retry::{Attempt, EXPAND_POLICY, retry_until};
use crate::web_search::types::{Platform, SearchQuery};

const BASE: &str = "https://s.weibo.com/";
const CARD: &str = "div.card-wrap[mid]";
const FULL_TEXT: &str = "p[node-type='feed_list_content_full']";
const SHORT_TEXT: &str = "p[node-type='feed_list_content']";
const COMMENT_TOGGLE: &str = "a[action-type='feed_list_comment']";
const TOP_COMMENT: &str = "div.card-comment div.list > div.card-review";

pub struct WeiboScraper;

#[async_trait]
impl PlatformScraper for WeiboScraper {
    fn platform(&self) -> Platform {
        Platform::Microblog
    }

    fn items_per_page(&self) -> usize {
        10
    }

    fn login_url(&self) -> &'static str {
        "https://passport.weibo.com/sso/signin"
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        format!(
            "https://s.weibo.com/weibo?q={}",
            urlencoding::encode(&query.text())
        )
    }

    fn item_selector(&self) -> &'static str {
        CARD
    }

    fn no_results_selector(&self) -> &'static str {
        "div.card-no-result"
    }

    fn pagination(&self) -> Pagination {
        Pagination::NextPage("div.m-page a.next")
    }

    fn parse_posts(&self, html: &str) -> Vec<PlatformPost> {
        let document = Html::parse_document(html);
        let Some(cards) = selector(CARD) else {
            return Vec::new();
        };
        document.select(&cards).filter_map(parse_card).collect()
    }

    /// Long posts are folded behind an "expand" link that swaps in the full
    /// text node; comments open in a panel under the card
    async fn expand(
        &self,
        page: &dyn PageDriver,
        post: &mut PlatformPost,
        options: &PlatformOptions,
    ) -> Result<()> {
        let index = locate_item(page, CARD, &post.link, card_link).await?;

        if let Some(text) = unfold(page, index).await? {
            post.content = strip_fold_marker(&text);
        }
        if options.max_comments > 0 {
            post.comments = load_comments(page, index, options.max_comments).await?;
        }
        Ok(())
    }
}

/// Click the card's unfold link and wait for the full text node
async fn unfold(page: &dyn PageDriver, index: usize) -> Result<Option<String>> {
    let script = click_in_card(index, "a[action-type='fl_unfold']");
    if page.evaluate(&script).await? != Value::Bool(true) {
        return Ok(None);
    }

    Ok(retry_until(EXPAND_POLICY, "microblog_unfold", move |_| async move {
        let html = page.html().await?;
        let document = Html::parse_document(&html);
        let text = selector(CARD)
            .and_then(|cards| document.select(&cards).nth(index))
            .and_then(|card| text_in(card, &[FULL_TEXT]));
        Ok(match text {
            Some(text) => Attempt::Ready(text),
            None => Attempt::NotYet,
        })
    })
    .await)
}

async fn load_comments(
    page: &dyn PageDriver,
    index: usize,
    max_comments: usize,
) -> Result<Vec<PlatformComment>> {
    let script = click_in_card(index, COMMENT_TOGGLE);
    if page.evaluate(&script).await? != Value::Bool(true) {
        return Ok(Vec::new());
    }

    let comments = retry_until(EXPAND_POLICY, "microblog_comments", move |_| async move {
        let html = page.html().await?;
        let comments = comments_in_card(&html, index, max_comments);
        Ok(if comments.is_empty() {
            Attempt::NotYet
        } else {
            Attempt::Ready(comments)
        })
    })
    .await;
    Ok(comments.unwrap_or_default())
}

/// Script clicking the first `target` inside card `index`; yields whether
/// anything was clicked
fn click_in_card(index: usize, target: &str) -> String {
    format!(
        "(() => {{ const card = document.querySelectorAll(\"{CARD}\")[{index}]; \
         const target = card && card.querySelector(\"{target}\"); \
         if (!target) return false; target.click(); return true; }})()"
    )
}

fn card_link(card: ElementRef<'_>) -> Option<String> {
    parse_card(card).map(|post| post.link)
}

/// Top-level comments of card `index` with their inline replies
fn comments_in_card(html: &str, index: usize, max_comments: usize) -> Vec<PlatformComment> {
    let document = Html::parse_document(html);
    let (Some(cards), Some(top), Some(child)) = (
        selector(CARD),
        selector(TOP_COMMENT),
        selector("div.child-list div.card-review"),
    ) else {
        return Vec::new();
    };
    let Some(card) = document.select(&cards).nth(index) else {
        return Vec::new();
    };
    card.select(&top)
        .filter_map(|review| {
            let mut comment = parse_review(review)?;
            comment.replies = review.select(&child).filter_map(parse_review).collect();
            Some(comment)
        })
        .take(max_comments)
        .collect()
}

/// The first `div.txt` is the review's own; replies come after it
fn parse_review(review: ElementRef<'_>) -> Option<PlatformComment> {
    let author = text_in(review, &["div.txt a.name"]).unwrap_or_default();
    let text = text_in(review, &["div.txt"])?;
    let content = text
        .strip_prefix(author.as_str())
        .map(|rest| rest.trim_start().trim_start_matches(['：', ':']).trim())
        .unwrap_or(text.as_str())
        .to_string();
    Some(PlatformComment {
        author_link: attr_in(review, "div.txt a.name", "href")
            .and_then(|href| absolute_link(BASE, &href)),
        author,
        content,
        time: text_in(review, &["p.from"]).unwrap_or_default(),
        like_count: text_in(review, &["a[action-type='feed_list_like'] em"]).unwrap_or_default(),
        replies: Vec::new(),
    })
}

fn parse_card(card: ElementRef<'_>) -> Option<PlatformPost> {
    let href = attr_in(card, "div.from a", "href")?;
    let mut post = PlatformPost::new(PostKind::Microblog, absolute_link(BASE, &href)?);
    post.author = text_in(card, &["a.name"]).unwrap_or_default();
    post.publish_time = text_in(card, &["div.from a"]).unwrap_or_default();
    post.content = text_in(card, &[FULL_TEXT, SHORT_TEXT])
        .map(|text| strip_fold_marker(&text))
        .unwrap_or_default();

    if let Some(actions) = selector("div.card-act ul li") {
        let counts: Vec<Option<String>> = card
            .select(&actions)
            .map(|li| trailing_count(&li.text().collect::<String>()))
            .collect();
        for (key, value) in ["reposts", "comments", "likes"].into_iter().zip(counts) {
            post.engage(key, value);
        }
    }
    Some(post)
}

/// `"转发 12"` -> `Some("12")`; a bare label has no count
fn trailing_count(label: &str) -> Option<String> {
    let last = label.split_whitespace().last()?;
    last.chars()
        .next()
        .filter(char::is_ascii_digit)
        .map(|_| last.to_string())
}

fn strip_fold_marker(text: &str) -> String {
    text.trim_end_matches("收起d")
        .trim_end_matches("展开c")
        .trim_end_matches("收起")
        .trim_end_matches("展开")
        .trim()
        .to_string()
}
