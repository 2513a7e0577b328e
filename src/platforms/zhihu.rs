//! Q&A platform (zhihu.com)

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde_json::Value;

use super::{
    PlatformComment, PlatformOptions, PlatformPost, PlatformScraper, PostKind, absolute_link,
    attr_in, locate_item, selector, text_in,
};
use crate::browser::PageDriver;
use crate::utils::retry::{Attempt, EXPAND_POLICY, retry_until};
use crate::web_search::types::{Platform, SearchQuery};

const BASE: &str = "https://www.zhihu.com/";
const CARD: &str = ".SearchResult-Card";

pub struct ZhihuScraper;

#[async_trait]
impl PlatformScraper for ZhihuScraper {
    fn platform(&self) -> Platform {
        Platform::Qa
    }

    fn items_per_page(&self) -> usize {
        10
    }

    fn login_url(&self) -> &'static str {
        "https://www.zhihu.com/signin"
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        format!(
            "https://www.zhihu.com/search?type=content&q={}",
            urlencoding::encode(&query.text())
        )
    }

    fn item_selector(&self) -> &'static str {
        CARD
    }

    fn no_results_selector(&self) -> &'static str {
        ".SearchNoContent, .EmptyState"
    }

    fn parse_posts(&self, html: &str) -> Vec<PlatformPost> {
        let document = Html::parse_document(html);
        let Some(cards) = selector(CARD) else {
            return Vec::new();
        };
        document.select(&cards).filter_map(parse_card).collect()
    }

    /// Answers are truncated in the result list; "read more" expands in
    /// place and the comment toggle opens the thread under the answer
    async fn expand(
        &self,
        page: &dyn PageDriver,
        post: &mut PlatformPost,
        options: &PlatformOptions,
    ) -> Result<()> {
        let index = locate_item(page, CARD, &post.link, card_link).await?;
        if !page.scroll_nth_into_view(CARD, index).await? {
            return Err(anyhow!("answer card {index} is gone"));
        }

        if page.evaluate(&read_more_script(index)).await? == Value::Bool(true) {
            let expanded = retry_until(EXPAND_POLICY, "answer_expand", move |_| async move {
                let html = page.html().await?;
                Ok(match full_answer(&html, index) {
                    Some(text) => Attempt::Ready(text),
                    None => Attempt::NotYet,
                })
            })
            .await;
            match expanded {
                Some(text) => post.content = text,
                None => return Err(anyhow!("answer did not expand")),
            }
        }

        if options.max_comments > 0 {
            post.comments = load_comments(page, index, options.max_comments).await?;
        }
        Ok(())
    }
}

fn read_more_script(index: usize) -> String {
    format!(
        "(() => {{ const card = document.querySelectorAll('{CARD}')[{index}]; \
         const more = card && card.querySelector('button.ContentItem-more'); \
         if (!more) return false; more.click(); return true; }})()"
    )
}

/// The comment toggle is the action button labelled with the comment count
fn comment_toggle_script(index: usize) -> String {
    format!(
        "(() => {{ const card = document.querySelectorAll('{CARD}')[{index}]; \
         const toggle = card && Array.from(card.querySelectorAll('button.ContentItem-action')) \
         .find(b => b.textContent.includes('评论')); \
         if (!toggle) return false; toggle.click(); return true; }})()"
    )
}

async fn load_comments(
    page: &dyn PageDriver,
    index: usize,
    max_comments: usize,
) -> Result<Vec<PlatformComment>> {
    if page.evaluate(&comment_toggle_script(index)).await? != Value::Bool(true) {
        return Ok(Vec::new());
    }

    let comments = retry_until(EXPAND_POLICY, "answer_comments", move |_| async move {
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

fn card_link(card: ElementRef<'_>) -> Option<String> {
    parse_card(card).map(|post| post.link)
}

/// Each `ul.NestComment` is one root comment followed by its replies
fn comments_in_card(html: &str, index: usize, max_comments: usize) -> Vec<PlatformComment> {
    let document = Html::parse_document(html);
    let (Some(cards), Some(threads), Some(root), Some(child)) = (
        selector(CARD),
        selector("ul.NestComment"),
        selector("li.NestComment--rootComment"),
        selector("li.NestComment--child"),
    ) else {
        return Vec::new();
    };
    let Some(card) = document.select(&cards).nth(index) else {
        return Vec::new();
    };
    card.select(&threads)
        .filter_map(|thread| {
            let mut comment = thread.select(&root).next().and_then(parse_comment)?;
            comment.replies = thread.select(&child).filter_map(parse_comment).collect();
            Some(comment)
        })
        .take(max_comments)
        .collect()
}

fn parse_comment(node: ElementRef<'_>) -> Option<PlatformComment> {
    let content = text_in(node, &[".CommentContent", ".CommentItemV2-content"])?;
    Some(PlatformComment {
        author: text_in(node, &["a.UserLink-link"]).unwrap_or_default(),
        author_link: attr_in(node, "a.UserLink-link", "href")
            .and_then(|href| absolute_link(BASE, &href)),
        content,
        time: text_in(node, &[".CommentItemV2-time"]).unwrap_or_default(),
        like_count: text_in(node, &["button.CommentItemV2-likeBtn span"]).unwrap_or_default(),
        replies: Vec::new(),
    })
}

fn parse_card(card: ElementRef<'_>) -> Option<PlatformPost> {
    let href = attr_in(card, "h2.ContentItem-title a", "href")
        .or_else(|| attr_in(card, "meta[itemprop='url']", "content"))?;
    let mut post = PlatformPost::new(PostKind::Answer, absolute_link(BASE, &href)?);
    post.title = text_in(card, &["h2.ContentItem-title"]);
    post.author = attr_in(card, ".AuthorInfo meta[itemprop='name']", "content")
        .or_else(|| text_in(card, &[".AuthorInfo-name"]))
        .unwrap_or_default();
    post.publish_time = attr_in(card, "meta[itemprop='dateCreated']", "content")
        .or_else(|| text_in(card, &[".ContentItem-time"]))
        .unwrap_or_default();
    post.content = text_in(card, &[".RichContent-inner", ".RichText"]).unwrap_or_default();
    post.engage(
        "upvotes",
        attr_in(card, "meta[itemprop='upvoteCount']", "content")
            .or_else(|| text_in(card, &["button.VoteButton--up"])),
    );
    post.engage(
        "comments",
        attr_in(card, "meta[itemprop='commentCount']", "content"),
    );
    Some(post)
}

/// Text of card `index` once its collapse control is gone
fn full_answer(html: &str, index: usize) -> Option<String> {
    let document = Html::parse_document(html);
    let cards = selector(CARD)?;
    let card = document.select(&cards).nth(index)?;
    let collapsed = selector("button.ContentItem-more")
        .map(|more| card.select(&more).next().is_some())
        .unwrap_or(false);
    if collapsed {
        return None;
    }
    text_in(card, &[".RichContent-inner", ".RichText"])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{Advance, FakePage};

    fn card(id: u32, body: &str, collapsed: bool) -> String {
        let more = if collapsed {
            r#"<button class="ContentItem-more">阅读全文</button>"#
        } else {
            ""
        };
        format!(
            r#"<div class="Card SearchResult-Card"><div class="ContentItem AnswerItem">
                 <h2 class="ContentItem-title"><a href="//www.zhihu.com/question/1/answer/{id}">Rust 值得学吗？</a></h2>
                 <div class="AuthorInfo"><meta itemprop="name" content="答主{id}"></div>
                 <meta itemprop="upvoteCount" content="321"><meta itemprop="dateCreated" content="2024-01-05T08:00:00.000Z">
                 <div class="RichContent"><div class="RichContent-inner"><span class="RichText">{body}</span></div>{more}</div>
               </div></div>"#
        )
    }

    #[test]
    fn parses_answer_cards() {
        let posts = ZhihuScraper.parse_posts(&card(7, "值得。", false));

        assert_eq!(posts.len(), 1);
        let post = &posts[0];
        assert_eq!(post.link, "https://www.zhihu.com/question/1/answer/7");
        assert_eq!(post.title.as_deref(), Some("Rust 值得学吗？"));
        assert_eq!(post.author, "答主7");
        assert_eq!(post.publish_time, "2024-01-05T08:00:00.000Z");
        assert_eq!(post.content, "值得。");
        assert_eq!(post.engagement.get("upvotes").map(String::as_str), Some("321"));
    }

    const THREAD: &str = r#"<div class="Comments-container"><ul class="NestComment">
          <li class="NestComment--rootComment"><div class="CommentItemV2">
            <a class="UserLink-link" href="//www.zhihu.com/people/ferris">Ferris</a>
            <span class="CommentItemV2-time">2024-01-06</span>
            <div class="CommentItemV2-content"><div class="CommentContent">所有权是关键</div></div>
            <button class="CommentItemV2-likeBtn">赞 <span>15</span></button>
          </div></li>
          <li class="NestComment--child"><div class="CommentItemV2">
            <a class="UserLink-link" href="//www.zhihu.com/people/crab">Crab</a>
            <div class="CommentItemV2-content"><div class="CommentContent">还有生命周期</div></div>
          </div></li>
        </ul><ul class="NestComment">
          <li class="NestComment--rootComment"><div class="CommentItemV2">
            <a class="UserLink-link" href="//www.zhihu.com/people/gopher">Gopher</a>
            <div class="CommentItemV2-content"><div class="CommentContent">Go 也不错</div></div>
          </div></li>
        </ul></div>"#;

    /// A card whose title link is missing, so it yields no post
    const TEASER: &str = r#"<div class="Card SearchResult-Card"><div class="RelevantQuery">相关搜索</div></div>"#;

    #[tokio::test(start_paused = true)]
    async fn expand_waits_for_full_text() {
        let collapsed = format!("{}{}", card(1, "短", false), card(2, "截断…", true));
        let expanded = format!("{}{}", card(1, "短", false), card(2, "完整的回答内容", false));
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![collapsed.clone(), collapsed.clone(), expanded]);
        page.advance_on(Advance::HtmlRead);
        page.set_evaluation(&read_more_script(1), Value::Bool(true));
        let mut post = ZhihuScraper.parse_posts(&collapsed).remove(1);

        ZhihuScraper
            .expand(&*page, &mut post, &PlatformOptions::default())
            .await
            .unwrap();

        assert_eq!(post.content, "完整的回答内容");
    }

    #[tokio::test(start_paused = true)]
    async fn expand_targets_the_card_by_link_not_list_position() {
        let collapsed = format!("{TEASER}{}", card(2, "截断…", true));
        let expanded = format!("{TEASER}{}", card(2, "完整的回答内容", false));
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![collapsed.clone(), expanded]);
        page.advance_on(Advance::HtmlRead);
        page.set_evaluation(&read_more_script(1), Value::Bool(true));
        let mut posts = ZhihuScraper.parse_posts(&collapsed);
        assert_eq!(posts.len(), 1);

        ZhihuScraper
            .expand(&*page, &mut posts[0], &PlatformOptions::default())
            .await
            .unwrap();

        assert_eq!(posts[0].content, "完整的回答内容");
    }

    #[tokio::test(start_paused = true)]
    async fn expand_opens_comment_thread() {
        let closed = card(3, "值得。", false);
        let open = format!(
            "{}{THREAD}</div></div>",
            closed.strip_suffix("</div></div>").unwrap()
        );
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![closed.clone(), open]);
        page.advance_on(Advance::HtmlRead);
        page.set_evaluation(&comment_toggle_script(0), Value::Bool(true));
        let mut post = ZhihuScraper.parse_posts(&closed).remove(0);
        let options = PlatformOptions {
            max_comments: 1,
            ..PlatformOptions::default()
        };

        ZhihuScraper.expand(&*page, &mut post, &options).await.unwrap();

        assert_eq!(post.comments.len(), 1);
        let comment = &post.comments[0];
        assert_eq!(comment.author, "Ferris");
        assert_eq!(comment.content, "所有权是关键");
        assert_eq!(comment.time, "2024-01-06");
        assert_eq!(comment.like_count, "15");
        assert_eq!(
            comment.author_link.as_deref(),
            Some("https://www.zhihu.com/people/ferris")
        );
        assert_eq!(comment.replies.len(), 1);
        assert_eq!(comment.replies[0].content, "还有生命周期");
    }

    #[tokio::test]
    async fn expand_is_a_no_op_without_read_more() {
        let page = FakePage::with_html(card(1, "短", false));
        let mut post = ZhihuScraper.parse_posts(&card(1, "短", false)).remove(0);

        ZhihuScraper
            .expand(&page, &mut post, &PlatformOptions::default())
            .await
            .unwrap();
        assert_eq!(post.content, "短");
        assert!(post.comments.is_empty());
    }
}
