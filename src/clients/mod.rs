pub mod rbmq;
