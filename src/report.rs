// Subject and body text for the notification email.

use chrono_tz::Tz;

use crate::models::CategoryFilter;
use crate::month::MonthRange;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub range: MonthRange,
    pub rows: usize,
    pub category: Option<CategoryFilter>,
    pub page_size: u32,
    pub timezone: Tz,
}

impl RunSummary {
    pub fn subject(&self) -> String {
        format!(
            "[Dongchedi] 销量数据 {}—{} 共 {} 行",
            self.range.start(),
            self.range.end(),
            self.rows
        )
    }

    pub fn body(&self) -> String {
        let category = match self.category {
            Some(CategoryFilter::BatteryElectric) => "纯电 (bev)",
            Some(CategoryFilter::PluginHybrid) => "插混 (phev)",
            None => "全部",
        };
        format!(
            "您好，\n\n\
             {start}—{end} 的月度销量排行已抓取完成，共 {rows} 行，见附件 CSV（UTF-8 带 BOM）。\n\n\
             能源类型：{category}\n\
             每页条数：{page_size}\n\
             月份基准时区：{timezone}（默认抓取该时区下上一个完整月份）\n\n\
             如需重抓某个月份，设置 FORCE_YYYYMM=YYYYMM 后重新运行。\n",
            start = self.range.start(),
            end = self.range.end(),
            rows = self.rows,
            page_size = self.page_size,
            timezone = self.timezone.name(),
        )
    }
}
