//! Short-form notes platform (xiaohongshu.com)
//!
//! The search feed only shows covers and titles; the note body and its
//! comment thread live in a modal opened by clicking the cover.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{ElementRef, Html};

use super::{
    PlatformComment, PlatformOptions, PlatformPost, PlatformScraper, PostKind, absolute_link,
    attr_in, locate_item, selector, text_in,
};
use crate::browser::PageDriver;
use crate::utils::retry::{Attempt, EXPAND_POLICY, retry_until};
use crate::web_search::types::{Platform, SearchQuery};

const BASE: &str = "https://www.xiaohongshu.com/";
const ITEM: &str = "section.note-item";
const COVER: &str = "section.note-item a.cover";
const MODAL: &str = "#noteContainer";
const MODAL_CLOSE: &str = "div.close-circle";

pub struct XiaohongshuScraper;

#[async_trait]
impl PlatformScraper for XiaohongshuScraper {
    fn platform(&self) -> Platform {
        Platform::Shortform
    }

    fn items_per_page(&self) -> usize {
        20
    }

    fn login_url(&self) -> &'static str {
        "https://www.xiaohongshu.com/explore"
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        format!(
            "https://www.xiaohongshu.com/search_result?keyword={}&source=web_search_result_notes",
            urlencoding::encode(&query.text())
        )
    }

    fn item_selector(&self) -> &'static str {
        ITEM
    }

    fn no_results_selector(&self) -> &'static str {
        "div.search-empty, div.empty-container"
    }

    fn parse_posts(&self, html: &str) -> Vec<PlatformPost> {
        let document = Html::parse_document(html);
        let Some(items) = selector(ITEM) else {
            return Vec::new();
        };
        document.select(&items).filter_map(parse_card).collect()
    }

    async fn expand(
        &self,
        page: &dyn PageDriver,
        post: &mut PlatformPost,
        options: &PlatformOptions,
    ) -> Result<()> {
        let index = locate_item(page, COVER, &post.link, |cover| {
            cover
                .value()
                .attr("href")
                .and_then(|href| absolute_link(BASE, href))
        })
        .await?;
        page.scroll_nth_into_view(COVER, index).await?;
        if !page.click_nth(COVER, index).await? {
            return Err(anyhow!("note cover {index} is gone"));
        }

        let opened = retry_until(EXPAND_POLICY, "note_modal", move |_| async move {
            Ok(if page.exists(MODAL).await? {
                Attempt::Ready(())
            } else {
                Attempt::NotYet
            })
        })
        .await;
        if opened.is_none() {
            return Err(anyhow!("note modal did not open"));
        }

        let html = page.html().await?;
        apply_detail(&html, post, options.max_comments);

        if !page.click(MODAL_CLOSE).await? {
            page.press_key("body", "Escape").await?;
        }
        Ok(())
    }
}

fn parse_card(card: ElementRef<'_>) -> Option<PlatformPost> {
    let href = attr_in(card, "a.cover", "href")
        .or_else(|| attr_in(card, "a[href*='/explore/']", "href"))?;
    let mut post = PlatformPost::new(PostKind::Note, absolute_link(BASE, &href)?);
    post.title = text_in(card, &["a.title span", "a.title", ".footer .title"]);
    post.content = post.title.clone().unwrap_or_default();
    post.author = text_in(card, &[".author .name", ".author-wrapper .name"]).unwrap_or_default();
    post.publish_time = text_in(card, &[".author .time", ".time"]).unwrap_or_default();
    post.engage("likes", text_in(card, &[".like-wrapper .count", ".like-wrapper"]));
    Some(post)
}

/// Copy body, time and comments from the open note modal into `post`
fn apply_detail(html: &str, post: &mut PlatformPost, max_comments: usize) {
    let document = Html::parse_document(html);
    let Some(modal) = selector(MODAL).and_then(|sel| document.select(&sel).next()) else {
        return;
    };

    if let Some(title) = text_in(modal, &["#detail-title"]) {
        post.title = Some(title);
    }
    if let Some(body) = text_in(modal, &["#detail-desc .note-text", "#detail-desc"]) {
        post.content = body;
    }
    if let Some(time) = text_in(modal, &[".bottom-container .date", ".date"]) {
        post.publish_time = time;
    }
    post.engage(
        "collects",
        text_in(modal, &[".interact-container .collect-wrapper .count"]),
    );
    post.engage(
        "comments",
        text_in(modal, &[".interact-container .chat-wrapper .count"]),
    );

    let Some(parents) = selector(".comments-container .parent-comment") else {
        return;
    };
    post.comments = modal
        .select(&parents)
        .filter_map(|thread| {
            let head = selector(".comment-item").and_then(|sel| thread.select(&sel).next())?;
            let mut comment = parse_comment(head)?;
            if let Some(sub) = selector(".reply-container .comment-item-sub") {
                comment.replies = thread.select(&sub).filter_map(parse_comment).collect();
            }
            Some(comment)
        })
        .take(max_comments)
        .collect();
}

fn parse_comment(node: ElementRef<'_>) -> Option<PlatformComment> {
    let content = text_in(node, &[".content .note-text", ".content"])?;
    Some(PlatformComment {
        author: text_in(node, &[".author .name", ".name"]).unwrap_or_default(),
        content,
        time: text_in(node, &[".info .date span", ".date"]).unwrap_or_default(),
        like_count: text_in(node, &[".like .count"]).unwrap_or_default(),
        author_link: attr_in(node, ".author a.name", "href")
            .and_then(|href| absolute_link(BASE, &href)),
        replies: Vec::new(),
    })
}
