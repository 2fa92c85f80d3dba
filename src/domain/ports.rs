use crate::domain::model::{NewsArticle, ObservationBatch};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 擷取端（天氣、新聞、港口流量）的資料來源
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch_batch(&self) -> Result<ObservationBatch>;

    fn describe(&self) -> String;
}

/// 文字情緒分析：輸出固定在 [-1, 1]，同樣的輸入必須得到同樣的結果
pub trait SentimentModel: Send + Sync {
    fn score_text(&self, text: &str) -> f64;

    fn count_urgency_keywords(&self, text: &str) -> u32;

    fn score_article(&self, article: &NewsArticle) -> f64 {
        self.score_text(&format!("{} {}", article.title, article.content))
    }
}
