//! Prompts for the report writer.
//!
//! Every prompt asks for an `HtmlSnippet`. Structured inputs are passed as
//! JSON so the model sees exactly what the analysis produced.

use crate::error::Result;
use crate::models::{
    CritiqueResponse, MarketingCampaignResponse, Photograph, PriceResponse,
    ProductResearchResponse, ResearchResponse, SocialMediaChannelResponse,
};
use serde::Serialize;

pub const WRITER_NAME: &str = "HTML report writer";

pub const WRITER_INSTRUCTIONS: &str = "You write sections of a single-page HTML marketing \
report for a fine art photograph. Reply with the HTML of the requested section only, plus \
any CSS you introduce. The current stylesheet is attached as index.css: reuse its classes \
and only return new rules in new_css. Images are referenced by relative file name.";

fn json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn introduction(photo: &Photograph) -> Result<String> {
    Ok(format!(
        "Start the report. Produce the opening of the document: <html>, <head> with a link to \
         index.css, and <body>, followed by a title section for the photograph '{}' showing \
         photo.jpg and its description. Place a <toc/> element where the table of contents \
         belongs. Do not close <body> or <html>.\nPhotograph: {}",
        photo.title,
        json(photo)?
    ))
}

pub fn critique(critique: &CritiqueResponse) -> Result<String> {
    Ok(format!(
        "Write the critique section. Show each rated area with its rating, praise and \
         suggestion, then the summary.\nCritique: {}",
        json(critique)?
    ))
}

pub fn medium_introduction(medium: &str, preview_file: &str, research: &ResearchResponse) -> Result<String> {
    Ok(format!(
        "Write the introduction for the '{medium}' print. Show the preview image {preview_file} \
         and summarize the research on how the medium suits the photograph.\nResearch: {}",
        json(research)?
    ))
}

pub fn pricing(medium: &str, product: &ProductResearchResponse, price: &PriceResponse) -> Result<String> {
    Ok(format!(
        "Write the pricing section for the '{medium}' print. Lead with the product title and \
         sales copy, then a table of estimated costs and recommended prices per size, then the \
         executive summary and market comparables.\nProduct: {}\nPricing: {}",
        json(product)?,
        json(price)?
    ))
}

pub fn campaign(medium: &str, campaign: &MarketingCampaignResponse) -> Result<String> {
    Ok(format!(
        "Write the marketing campaign section for the '{medium}' print: segments, positioning, \
         message pillars, channels, materials and the campaign plan.\nCampaign: {}",
        json(campaign)?
    ))
}

pub fn social_introduction(medium: &str, channels: &[&str]) -> String {
    format!(
        "Write a short introduction to the social media strategy for the '{medium}' print. \
         The channels covered, in priority order, are: {}.",
        channels.join(", ")
    )
}

pub fn channel(medium: &str, strategy: &SocialMediaChannelResponse) -> Result<String> {
    Ok(format!(
        "Write the {} content strategy for the '{medium}' print: pros and cons, sample posts, \
         best practices and hashtags.\nStrategy: {}",
        strategy.channel_name,
        json(strategy)?
    ))
}
