//! 译文继承模块
//!
//! 重新导入时按原文完全相等匹配，把旧映射中已确认的译文带到新生成的单元上

use std::collections::HashMap;

use tracing::info;

use crate::mapping_store::ContentUnit;

/// 原文 -> (译文, 翻译时间) 索引
#[derive(Debug, Clone, Default)]
pub struct CarryOver {
    index: HashMap<String, (String, String)>,
}

impl CarryOver {
    /// 从旧映射（按序号排序）建立索引，只收录非空译文
    ///
    /// 同一原文出现多次时后出现的覆盖先出现的
    pub fn from_units(units: &[ContentUnit]) -> Self {
        let mut index = HashMap::new();
        for unit in units.iter().filter(|unit| unit.is_translated()) {
            index.insert(
                unit.original_text.clone(),
                (unit.translated_text.clone(), unit.translated_at.clone()),
            );
        }
        Self { index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 应用到新单元，返回继承数量
    pub fn apply(&self, units: &mut [ContentUnit]) -> usize {
        let mut carried = 0;
        for unit in units.iter_mut() {
            if let Some((translated_text, translated_at)) = self.index.get(&unit.original_text) {
                unit.translated_text = translated_text.clone();
                unit.translated_at = translated_at.clone();
                carried += 1;
            }
        }

        if carried > 0 {
            info!("♻️  继承已有译文: {} 段", carried);
        }
        carried
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(sequence: usize, original: &str, translated: &str, at: &str) -> ContentUnit {
        let mut unit = ContentUnit::new(sequence, original.to_string(), "Text/a.xhtml".to_string());
        unit.translated_text = translated.to_string();
        unit.translated_at = at.to_string();
        unit
    }

    #[test]
    fn test_carries_translation_and_timestamp() {
        let old = vec![unit(1, "Hello", "你好", "t1"), unit(2, "World", "", "")];
        let carry = CarryOver::from_units(&old);
        assert_eq!(carry.len(), 1);

        let mut fresh = vec![
            unit(1, "Intro", "", ""),
            unit(2, "Hello", "", ""),
            unit(3, "World", "", ""),
        ];
        assert_eq!(carry.apply(&mut fresh), 1);
        assert_eq!(fresh[1].translated_text, "你好");
        assert_eq!(fresh[1].translated_at, "t1");
        assert!(fresh[2].translated_text.is_empty());
        assert!(fresh[0].translated_text.is_empty());
    }

    #[test]
    fn test_duplicate_originals_take_last_seen() {
        let old = vec![unit(1, "Yes.", "是。", "t1"), unit(2, "Yes.", "好的。", "t2")];
        let carry = CarryOver::from_units(&old);

        let mut fresh = vec![unit(1, "Yes.", "", ""), unit(2, "Yes.", "", "")];
        assert_eq!(carry.apply(&mut fresh), 2);
        assert_eq!(fresh[0].translated_text, "好的。");
        assert_eq!(fresh[1].translated_text, "好的。");
        assert_eq!(fresh[0].translated_at, "t2");
    }

    #[test]
    fn test_empty_index() {
        let carry = CarryOver::from_units(&[unit(1, "A", "", "")]);
        assert!(carry.is_empty());
        let mut fresh = vec![unit(1, "A", "", "")];
        assert_eq!(carry.apply(&mut fresh), 0);
    }
}
